//! Order status graph and per-role permission to request a status
//!
//! ```text
//! in_process ──picker──▶ picked ──courier──▶ delivering ──courier──▶ finished
//!     │
//!     └──staff──▶ finished | canceled
//! ```
//!
//! The engine is pure: callers load the order, gather the guard facts and
//! apply the returned [`Transition`] through a conditional store write.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::auth::Role;
use crate::error::TransitionError;
use crate::models::order::OrderStatus;

/// Which statuses each role may request. Built once at startup.
#[derive(Debug, Clone)]
pub struct RolePermissions {
    allowed: HashMap<Role, HashSet<OrderStatus>>,
}

impl RolePermissions {
    pub fn standard() -> Self {
        let mut allowed = HashMap::new();
        allowed.insert(
            Role::Staff,
            HashSet::from([OrderStatus::Finished, OrderStatus::Canceled]),
        );
        allowed.insert(Role::Picker, HashSet::from([OrderStatus::Picked]));
        allowed.insert(
            Role::Courier,
            HashSet::from([OrderStatus::Delivering, OrderStatus::Finished]),
        );
        Self { allowed }
    }

    pub fn allows(&self, role: Role, status: OrderStatus) -> bool {
        self.allowed
            .get(&role)
            .is_some_and(|statuses| statuses.contains(&status))
    }
}

impl Default for RolePermissions {
    fn default() -> Self {
        Self::standard()
    }
}

/// Facts about the order and caller the engine cannot look up itself
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionGuard {
    pub deleted: bool,
    /// Orders currently `delivering` with the requesting courier assigned
    pub courier_active_deliveries: u64,
    /// Requesting courier is the one assigned to this order
    pub assigned_to_caller: bool,
}

/// The write a permitted request turns into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    StaffFinish,
    StaffCancel,
    MarkPicked,
    MarkDelivering,
    MarkDelivered,
}

impl Transition {
    pub fn target(self) -> OrderStatus {
        match self {
            Transition::StaffFinish | Transition::MarkDelivered => OrderStatus::Finished,
            Transition::StaffCancel => OrderStatus::Canceled,
            Transition::MarkPicked => OrderStatus::Picked,
            Transition::MarkDelivering => OrderStatus::Delivering,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusTransitionEngine {
    permissions: Arc<RolePermissions>,
}

impl StatusTransitionEngine {
    pub fn new(permissions: Arc<RolePermissions>) -> Self {
        Self { permissions }
    }

    pub fn can_transition(
        &self,
        current: OrderStatus,
        requested: OrderStatus,
        role: Role,
        guard: TransitionGuard,
    ) -> Result<Transition, TransitionError> {
        if guard.deleted {
            return Err(TransitionError::NotFound);
        }
        if !self.permissions.allows(role, requested) {
            return Err(TransitionError::Forbidden);
        }

        use crate::models::order::OrderStatus::*;
        match (role, requested) {
            (Role::Staff, Finished | Canceled) => {
                if current != InProcess {
                    return Err(TransitionError::NotChangeable);
                }
                Ok(if requested == Finished {
                    Transition::StaffFinish
                } else {
                    Transition::StaffCancel
                })
            }
            (Role::Picker, Picked) => match current {
                Picked | Delivering | Finished | Canceled => Err(TransitionError::NotChangeable),
                InProcess => Ok(Transition::MarkPicked),
            },
            (Role::Courier, Delivering) => {
                if current != Picked {
                    return Err(TransitionError::NotChangeable);
                }
                if guard.courier_active_deliveries > 0 {
                    return Err(TransitionError::CourierBusy);
                }
                Ok(Transition::MarkDelivering)
            }
            (Role::Courier, Finished) => {
                if current != Delivering {
                    return Err(TransitionError::NotChangeable);
                }
                if !guard.assigned_to_caller {
                    return Err(TransitionError::Forbidden);
                }
                Ok(Transition::MarkDelivered)
            }
            // A permission table wider than the graph grants nothing extra
            _ => Err(TransitionError::Forbidden),
        }
    }
}

impl Default for StatusTransitionEngine {
    fn default() -> Self {
        Self::new(Arc::new(RolePermissions::standard()))
    }
}
