//! Role- and ownership-based access rules.
//!
//! Every state-changing or data-revealing operation goes through
//! [`authorize`]. The rules live in one match so that endpoints cannot drift
//! apart from each other.

use model::entities::UserRole;

use crate::error::{ComputeError, Result};

/// The authenticated user an operation runs on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub id: i32,
    pub role: UserRole,
}

impl Caller {
    pub fn new(id: i32, role: UserRole) -> Self {
        Self { id, role }
    }

    /// Managers and admins see and act on every tenant's data.
    pub fn is_staff(&self) -> bool {
        matches!(self.role, UserRole::Manager | UserRole::Admin)
    }

    fn owns(&self, owner_id: i32) -> bool {
        self.id == owner_id
    }
}

/// An operation together with the resource state the rule depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    SubmitReading,
    /// Rows owned by the caller.
    ViewOwn,
    /// Rows of every user.
    ViewAll,
    /// A single reading or invoice.
    ViewResource { owner_id: i32 },
    VerifyReading { already_verified: bool },
    GenerateInvoices,
    MarkPaid { owner_id: i32, already_paid: bool },
    DeleteReading { owner_id: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Forbidden(&'static str),
    /// The caller may act, but the resource is already in the target state.
    Conflict(&'static str),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Forbidden(reason) => Err(ComputeError::Forbidden(reason.to_string())),
            Decision::Conflict(reason) => Err(ComputeError::Conflict(reason.to_string())),
        }
    }
}

/// Decides whether `caller` may perform `action`.
///
/// Role and ownership are checked before resource state, so a caller that is
/// not allowed at all never learns whether the resource was already handled.
pub fn authorize(caller: &Caller, action: Action) -> Decision {
    use Decision::*;

    match action {
        Action::SubmitReading => match caller.role {
            UserRole::Resident | UserRole::Admin => Allow,
            UserRole::Manager => Forbidden("Only residents and admins can submit meter readings"),
        },
        Action::ViewOwn => Allow,
        Action::ViewAll => {
            if caller.is_staff() {
                Allow
            } else {
                Forbidden("Only managers and admins can view all records")
            }
        }
        Action::ViewResource { owner_id } => {
            if caller.owns(owner_id) || caller.is_staff() {
                Allow
            } else {
                Forbidden("Not authorized to view this record")
            }
        }
        Action::VerifyReading { already_verified } => {
            if !caller.is_staff() {
                Forbidden("Only managers and admins can verify readings")
            } else if already_verified {
                Conflict("Reading is already verified")
            } else {
                Allow
            }
        }
        Action::GenerateInvoices => {
            if caller.is_staff() {
                Allow
            } else {
                Forbidden("Only managers and admins can generate invoices")
            }
        }
        Action::MarkPaid {
            owner_id,
            already_paid,
        } => {
            if !(caller.owns(owner_id) || caller.is_staff()) {
                Forbidden("Not authorized to update this invoice")
            } else if already_paid {
                Conflict("Invoice is already paid")
            } else {
                Allow
            }
        }
        Action::DeleteReading { owner_id } => {
            if caller.owns(owner_id) || caller.role == UserRole::Admin {
                Allow
            } else {
                Forbidden("Not authorized to delete this reading")
            }
        }
    }
}

/// Which rows a listing query may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListScope {
    Owner(i32),
    All,
}

/// Resolves the scope of a listing: `all = false` is always the caller's own
/// rows, `all = true` requires [`Action::ViewAll`].
pub fn list_scope(caller: &Caller, all: bool) -> Result<ListScope> {
    if all {
        authorize(caller, Action::ViewAll).into_result()?;
        Ok(ListScope::All)
    } else {
        authorize(caller, Action::ViewOwn).into_result()?;
        Ok(ListScope::Owner(caller.id))
    }
}
