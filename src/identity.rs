//! Caller identity resolution.
//!
//! Which line of the device handled a call and how the platform's call
//! type codes map onto [`CallType`] are device-specific. The importer takes
//! a [`CallerIdentityResolver`] so the sync core never hardcodes them.

use std::collections::HashMap;

use crate::capture::NativeCallEntry;
use crate::model::CallType;

/// Resolves device-specific call attributes.
pub trait CallerIdentityResolver: Send + Sync {
    /// Map the native type code. `None` means the entry is not a call the
    /// engines track (voicemail, for example) and is skipped.
    fn resolve_call_type(&self, entry: &NativeCallEntry) -> Option<CallType>;

    /// Phone number of the device line that placed or received the call.
    fn resolve_device_phone(&self, entry: &NativeCallEntry) -> Option<String>;
}

/// Resolver for Android-style call logs.
///
/// Type codes follow `CallLog.Calls`: 1 incoming, 2 outgoing, 3 missed,
/// 4 voicemail, 5 rejected, 6 blocked, 7 answered externally.
#[derive(Debug, Clone, Default)]
pub struct CallLogResolver {
    /// Subscription/account id → line number.
    lines: HashMap<String, String>,
    /// Used when the entry carries no subscription id or it is unknown.
    default_line: Option<String>,
}

impl CallLogResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the number of a SIM line.
    #[must_use]
    pub fn with_line(mut self, subscription_id: &str, phone: &str) -> Self {
        self.lines
            .insert(subscription_id.to_string(), phone.to_string());
        self
    }

    #[must_use]
    pub fn with_default_line(mut self, phone: &str) -> Self {
        self.default_line = Some(phone.to_string());
        self
    }
}

impl CallerIdentityResolver for CallLogResolver {
    fn resolve_call_type(&self, entry: &NativeCallEntry) -> Option<CallType> {
        match entry.call_type {
            1 | 7 => Some(CallType::Incoming),
            2 => Some(CallType::Outgoing),
            3 => Some(CallType::Missed),
            5 => Some(CallType::Rejected),
            6 => Some(CallType::Blocked),
            _ => None,
        }
    }

    fn resolve_device_phone(&self, entry: &NativeCallEntry) -> Option<String> {
        entry
            .subscription_id
            .as_ref()
            .and_then(|id| self.lines.get(id))
            .or(self.default_line.as_ref())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(call_type: i32, subscription_id: Option<&str>) -> NativeCallEntry {
        NativeCallEntry {
            number: "555".into(),
            cached_name: None,
            call_type,
            duration: 10,
            date: 1_000,
            subscription_id: subscription_id.map(String::from),
        }
    }

    #[test]
    fn test_call_type_codes() {
        let resolver = CallLogResolver::new();
        assert_eq!(resolver.resolve_call_type(&entry(2, None)), Some(CallType::Outgoing));
        assert_eq!(resolver.resolve_call_type(&entry(7, None)), Some(CallType::Incoming));
        assert_eq!(resolver.resolve_call_type(&entry(6, None)), Some(CallType::Blocked));
        assert_eq!(resolver.resolve_call_type(&entry(4, None)), None);
    }

    #[test]
    fn test_device_line_lookup() {
        let resolver = CallLogResolver::new()
            .with_line("sim2", "+15550002")
            .with_default_line("+15550001");

        assert_eq!(
            resolver.resolve_device_phone(&entry(1, Some("sim2"))).as_deref(),
            Some("+15550002")
        );
        assert_eq!(
            resolver.resolve_device_phone(&entry(1, Some("sim9"))).as_deref(),
            Some("+15550001")
        );
        assert!(CallLogResolver::new().resolve_device_phone(&entry(1, None)).is_none());
    }
}
