//! Composite recording identifiers.
//!
//! A recording is identified by `folder-id:file-id:native-id`, where the native id is the
//! device conference id. Colons inside a component are doubled. Runs of colons are read
//! greedily, so a component may contain colons anywhere except as its first character;
//! [`RecordingId::new`] rejects components that start with one.

use std::fmt;
use std::str::FromStr;

use crate::connector::error::{CommandError, CommandResult};

const SEPARATOR: char = ':';

fn join(components: &[&str]) -> String {
    components
        .iter()
        .map(|component| component.replace(SEPARATOR, "::"))
        .collect::<Vec<_>>()
        .join(":")
}

fn split(input: &str) -> Vec<String> {
    let mut components = vec![String::new()];
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != SEPARATOR {
            if let Some(current) = components.last_mut() {
                current.push(c);
            }
            continue;
        }
        if chars.peek() == Some(&SEPARATOR) {
            chars.next();
            if let Some(current) = components.last_mut() {
                current.push(SEPARATOR);
            }
        } else {
            components.push(String::new());
        }
    }
    components
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordingId {
    pub folder_id: String,
    /// File name of the recording inside the folder
    pub file_id: String,
    /// Device conference id; empty once the device copy is gone
    pub native_id: String,
}

impl RecordingId {
    pub fn new(
        folder_id: impl Into<String>,
        file_id: impl Into<String>,
        native_id: impl Into<String>,
    ) -> CommandResult<Self> {
        let id = Self::from_parts(folder_id.into(), file_id.into(), native_id.into());
        for component in [&id.folder_id, &id.file_id, &id.native_id] {
            if component.starts_with(SEPARATOR) {
                return Err(CommandError::invalid_argument(format!(
                    "recording id component '{component}' starts with '{SEPARATOR}'"
                )));
            }
        }
        Ok(id)
    }

    /// Decoded components, which never start with a separator after the first
    fn from_parts(folder_id: String, file_id: String, native_id: String) -> Self {
        Self {
            folder_id,
            file_id,
            native_id,
        }
    }

    /// Folder and file encoded into the device recording title after `prefix`
    pub fn title(prefix: &str, folder_id: &str, file_id: &str) -> String {
        format!("{prefix}{}", join(&[folder_id, file_id]))
    }

    /// Inverse of [`RecordingId::title`]
    pub fn from_title(prefix: &str, title: &str, native_id: &str) -> Option<Self> {
        let encoded = title.strip_prefix(prefix)?;
        match split(encoded).as_slice() {
            [folder_id, file_id] if !folder_id.is_empty() && !file_id.is_empty() => {
                Some(Self::from_parts(folder_id.clone(), file_id.clone(), native_id.to_string()))
            }
            _ => None,
        }
    }

    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RecordingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join(&[&self.folder_id, &self.file_id, &self.native_id]))
    }
}

impl FromStr for RecordingId {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match split(s).as_slice() {
            [folder_id, file_id, native_id] => {
                Ok(Self::from_parts(folder_id.clone(), file_id.clone(), native_id.clone()))
            }
            _ => Err(CommandError::invalid_argument(format!("malformed recording id '{s}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_separators_are_doubled() {
        let id = RecordingId::new("f:1", "talk::a.mp4", "conf").unwrap();
        assert_eq!(id.to_string(), "f::1:talk::::a.mp4:conf");
        assert_eq!(id.to_string().parse::<RecordingId>().unwrap(), id);
    }

    #[test]
    fn test_empty_native_id() {
        let id: RecordingId = "folder:file.mp4:".parse().unwrap();
        assert_eq!(id.native_id, "");
        assert_eq!(id.to_string(), "folder:file.mp4:");
    }

    #[test]
    fn test_malformed_ids() {
        assert!("only-one".parse::<RecordingId>().is_err());
        assert!("a:b:c:d".parse::<RecordingId>().is_err());
    }

    #[test]
    fn test_leading_separator_is_rejected() {
        // "x" + ":a" would encode as "x:::a", which reads back as "x:" + "a"
        assert!(RecordingId::new("x", ":a", "1").is_err());
        assert!(RecordingId::new(":x", "a", "1").is_err());
        assert!(RecordingId::new("x", "a", ":1").is_err());
        let trailing = RecordingId::new("x:", "a", "1").unwrap();
        assert_eq!(trailing.to_string().parse::<RecordingId>().unwrap(), trailing);
    }

    #[test]
    fn test_title_round_trip() {
        let title = RecordingId::title("broker_", "0f3a", "weekly:1.mp4");
        assert_eq!(title, "broker_0f3a:weekly::1.mp4");
        let id = RecordingId::from_title("broker_", &title, "77").unwrap();
        assert_eq!(id, RecordingId::new("0f3a", "weekly:1.mp4", "77").unwrap());
        assert!(RecordingId::from_title("broker_", "manual recording", "1").is_none());
        assert!(RecordingId::from_title("broker_", "broker_nofile", "1").is_none());
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            folder in "[a-z0-9][a-z0-9:]{0,8}",
            file in "[a-z0-9][a-z0-9:._ ]{0,12}",
            native in "([a-z0-9][a-z0-9:]{0,6})?",
        ) {
            let id = RecordingId::new(folder, file, native).unwrap();
            prop_assert_eq!(id.to_string().parse::<RecordingId>().unwrap(), id);
        }
    }
}
