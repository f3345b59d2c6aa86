//! Immutable device command value object.

use std::fmt;

/// A named action plus ordered parameters; never mutated once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    action: String,
    parameters: Vec<(String, String)>,
}

const MASKED_PARAMETERS: [&str; 2] = ["password", "pwd"];

impl Command {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            parameters: Vec::new(),
        }
    }

    /// Append a parameter; repeated keys are kept in order
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((key.into(), value.into()));
        self
    }

    pub fn param_opt(self, key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.param(key, value),
            None => self,
        }
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn parameters(&self) -> &[(String, String)] {
        &self.parameters
    }

    /// First value of a parameter
    pub fn get(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// URL query string with `action` first
    pub fn to_query(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        serializer.append_pair("action", &self.action);
        for (key, value) in &self.parameters {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.action)?;
        for (key, value) in &self.parameters {
            if MASKED_PARAMETERS.contains(&key.as_str()) {
                write!(f, " {key}=***")?;
            } else {
                write!(f, " {key}={value}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_keeps_parameter_order() {
        let command = Command::new("permissions-update")
            .param("acl-id", "1001")
            .param("principal-id", "public-access")
            .param("permission-id", "view-hidden")
            .param_opt("description", None::<String>);

        assert_eq!(
            command.to_query(),
            "action=permissions-update&acl-id=1001&principal-id=public-access&permission-id=view-hidden"
        );
        assert_eq!(command.get("acl-id"), Some("1001"));
        assert_eq!(command.get("description"), None);
    }

    #[test]
    fn test_display_masks_credentials() {
        let command = Command::new("login")
            .param("login", "broker")
            .param("password", "s3cret word");
        assert_eq!(command.to_string(), "login login=broker password=***");
        assert!(command.to_query().contains("password=s3cret+word"));
    }
}
