//! Per-call audit options for mutating store operations.

use std::fmt;

use catalog_audit::AuditAction;

type Describe<T> = Box<dyn Fn(&T) -> String + Send + Sync>;

/// "Audit this call" for one mutating store operation.
///
/// Pass `None` instead to skip auditing.
pub struct AuditOptions<T> {
    pub(crate) performed_by: String,
    pub(crate) entity_name: String,
    pub(crate) ip_address: Option<String>,
    describe: Option<Describe<T>>,
    register: bool,
}

impl<T> AuditOptions<T> {
    pub fn new(performed_by: impl Into<String>, entity_name: impl Into<String>) -> Self {
        Self {
            performed_by: performed_by.into(),
            entity_name: entity_name.into(),
            ip_address: None,
            describe: None,
            register: false,
        }
    }

    /// Compute the record's `details` from the affected entity.
    pub fn describe(mut self, describe: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        self.describe = Some(Box::new(describe));
        self
    }

    /// Record creation as REGISTER instead of CREATE.
    pub fn register(mut self) -> Self {
        self.register = true;
        self
    }

    pub fn ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub(crate) fn create_action(&self) -> AuditAction {
        if self.register {
            AuditAction::Register
        } else {
            AuditAction::Create
        }
    }

    pub(crate) fn details(&self, entity: &T, action: AuditAction, id: &str) -> String {
        match &self.describe {
            Some(describe) => describe(entity),
            None => format!("{action} {} {id}", self.entity_name),
        }
    }
}

impl<T> fmt::Debug for AuditOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditOptions")
            .field("performed_by", &self.performed_by)
            .field("entity_name", &self.entity_name)
            .field("ip_address", &self.ip_address)
            .field("describe", &self.describe.is_some())
            .field("register", &self.register)
            .finish()
    }
}
