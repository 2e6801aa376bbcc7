// ── Device identity ──
//
// A device is addressed by (controller, component); the canonical string
// form "controller:component" is the storage and override-target key.
// Both parts are restricted to `[A-Za-z0-9_-]+`, the same constraint the
// REST path parameters and bus routing segments enforce.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Composite device identifier: controller id + component id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId {
    controller: String,
    component: String,
}

impl DeviceId {
    /// Build from validated parts.
    pub fn new(
        controller: impl Into<String>,
        component: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let controller = controller.into();
        let component = component.into();
        validate_part("controllerId", &controller)?;
        validate_part("componentId", &component)?;
        Ok(Self {
            controller,
            component,
        })
    }

    /// Parse the canonical `"controller:component"` form.
    pub fn parse(canonical: &str) -> Result<Self, CoreError> {
        let Some((controller, component)) = canonical.split_once(':') else {
            return Err(CoreError::validation(
                "deviceId",
                format!("expected 'controller:component', got '{canonical}'"),
            ));
        };
        Self::new(controller, component)
    }

    pub fn controller(&self) -> &str {
        &self.controller
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    /// Canonical string form, used as storage key and override target.
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.controller, self.component)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.controller, self.component)
    }
}

impl FromStr for DeviceId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn validate_part(field: &str, part: &str) -> Result<(), CoreError> {
    if part.is_empty() {
        return Err(CoreError::validation(field, "must not be empty"));
    }
    if let Some(bad) = part
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(CoreError::validation(
            field,
            format!("character '{bad}' outside [A-Za-z0-9_-]"),
        ));
    }
    Ok(())
}
