//! Device identities and the group names derived from them.

use herald_protocol::UNKNOWN_PLATFORM;
use std::fmt;

/// Stable user identifier, as issued by the account service.
pub type UserId = String;

/// Separator placed between username and platform in a group name.
const GROUP_SEPARATOR: char = '-';

/// Escapes the separator inside the username part of a group name.
const GROUP_ESCAPE: char = '\\';

/// Replace every whitespace run in a platform name with a single `_`.
///
/// Client agent strings such as `"Mozilla/5.0 (X11; Linux)"` become safe
/// routing tokens.
#[must_use]
pub fn normalize_platform(platform: &str) -> String {
    platform.split_whitespace().collect::<Vec<_>>().join("_")
}

/// Check whether a platform is absent or the unknown sentinel.
#[must_use]
pub fn is_unknown_platform(platform: &str) -> bool {
    let trimmed = platform.trim();
    trimmed.is_empty() || trimmed == UNKNOWN_PLATFORM
}

fn escape_username(username: &str, out: &mut String) {
    for c in username.chars() {
        if c == GROUP_SEPARATOR || c == GROUP_ESCAPE {
            out.push(GROUP_ESCAPE);
        }
        out.push(c);
    }
}

/// Derive the registry group name for a device identity.
///
/// An absent or unknown platform collapses to the bare username, so all of a
/// user's unclassified connections share one group. Separators inside the
/// username are escaped, so the first unescaped `-` always ends the username
/// and distinct identities never share a group.
#[must_use]
pub fn group_name(username: &str, platform: Option<&str>) -> String {
    let mut name = String::with_capacity(username.len() + 16);
    escape_username(username, &mut name);
    if let Some(p) = platform.filter(|p| !is_unknown_platform(p)) {
        name.push(GROUP_SEPARATOR);
        name.push_str(&normalize_platform(p));
    }
    name
}

/// A (username, platform) pair that presence and routing are scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId {
    username: String,
    platform: String,
}

impl DeviceId {
    /// Build a device identity from raw event fields.
    ///
    /// The username is trimmed. The platform is normalized the same way group
    /// names normalize it, so presence, routing and the offline queue agree
    /// on one form. An empty platform becomes the unknown sentinel.
    ///
    /// # Errors
    ///
    /// Returns an error message if the username is empty.
    pub fn new(username: &str, platform: &str) -> Result<Self, &'static str> {
        let username = username.trim();
        if username.is_empty() {
            return Err("username is missing");
        }
        let platform = normalize_platform(platform);
        let platform = if platform.is_empty() {
            UNKNOWN_PLATFORM.to_string()
        } else {
            platform
        };
        Ok(Self {
            username: username.to_string(),
            platform,
        })
    }

    /// The username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The normalized platform.
    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// The registry group this device joins.
    #[must_use]
    pub fn group(&self) -> String {
        group_name(&self.username, Some(&self.platform))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_name_with_platform() {
        assert_eq!(group_name("mona", Some("phone")), "mona-phone");
        assert_eq!(
            group_name("mona", Some("Mozilla/5.0 (X11;  Linux)")),
            "mona-Mozilla/5.0_(X11;_Linux)"
        );
    }

    #[test]
    fn test_group_name_unknown_platform() {
        assert_eq!(group_name("mona", None), "mona");
        assert_eq!(group_name("mona", Some(UNKNOWN_PLATFORM)), "mona");
        assert_eq!(group_name("mona", Some("  ")), "mona");
    }

    #[test]
    fn test_group_name_is_deterministic() {
        assert_eq!(
            group_name("ahmed", Some("desktop")),
            group_name("ahmed", Some("desktop"))
        );
        assert_ne!(
            group_name("ahmed", Some("desktop")),
            group_name("ahmed", Some("tablet"))
        );
    }

    #[test]
    fn test_device_id_validation() {
        assert!(DeviceId::new("", "phone").is_err());
        assert!(DeviceId::new("   ", "phone").is_err());

        let device = DeviceId::new(" mona ", "").unwrap();
        assert_eq!(device.username(), "mona");
        assert_eq!(device.platform(), UNKNOWN_PLATFORM);
        assert_eq!(device.group(), "mona");
    }

    #[test]
    fn test_group_name_escapes_separator_in_username() {
        assert_ne!(group_name("mona-phone", None), group_name("mona", Some("phone")));
        assert_eq!(group_name("mona-phone", None), "mona\\-phone");
        assert_eq!(group_name("mona", Some("phone")), "mona-phone");
        assert_ne!(
            group_name("a-b", Some("c")),
            group_name("a", Some("b-c"))
        );
        assert_ne!(group_name("a\\", Some("b")), group_name("a\\-b", None));
    }

    #[test]
    fn test_device_id_normalizes_platform() {
        let spaced = DeviceId::new("mona", "my  phone").unwrap();
        let single = DeviceId::new("mona", " my phone ").unwrap();
        assert_eq!(spaced, single);
        assert_eq!(spaced.platform(), "my_phone");
        assert_eq!(spaced.group(), "mona-my_phone");
    }
}
