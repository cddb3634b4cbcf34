//! Property-based tests for replstatus using proptest.

use proptest::prelude::*;
use replstatus::codec::{CacheSerializer, StatusValueSerializer};
use replstatus::{
    CacheConfig, NamingStyle, ProjectStatus, RefStatus, RemoteDestinationConfig,
    ReplicationResult, StatusCache, StatusKey, StatusValue,
};
use std::collections::BTreeMap;

fn any_result() -> impl Strategy<Value = ReplicationResult> {
    prop_oneof![
        Just(ReplicationResult::NotAttempted),
        Just(ReplicationResult::Scheduled),
        Just(ReplicationResult::Succeeded),
        Just(ReplicationResult::Failed),
        Just(ReplicationResult::Unknown),
    ]
}

fn project_name() -> impl Strategy<Value = String> {
    proptest::collection::vec("[a-z0-9]{1,8}", 1..4).prop_map(|parts| parts.join("/"))
}

proptest! {
    /// The last put for a key is the one visible, whatever the timestamps.
    #[test]
    fn test_last_write_wins(writes in proptest::collection::vec((any_result(), any::<i64>()), 1..20)) {
        let cache = StatusCache::new(&CacheConfig::default());
        let key = StatusKey::new("p", "d", "refs/heads/master");
        for (status, when) in &writes {
            cache.put(key.clone(), StatusValue::new(*status, *when));
        }
        let (status, when) = writes[writes.len() - 1];
        prop_assert_eq!(cache.get_if_present(&key), Some(StatusValue::new(status, when)));
    }

    /// Overall is FAILED iff some contained value is a failure.
    #[test]
    fn test_overall_matches_any_failure(
        values in proptest::collection::vec((0u8..5, 0u8..3, any_result()), 0..30)
    ) {
        let mut refs: BTreeMap<String, RefStatus> = BTreeMap::new();
        for (r, d, status) in &values {
            refs.entry(format!("refs/heads/{}", r))
                .or_default()
                .remote_status
                .insert(format!("host{}", d), StatusValue::new(*status, 0));
        }
        let any_failure = refs
            .values()
            .flat_map(|r| r.remote_status.values())
            .any(|v| v.status.is_failure());
        let status = ProjectStatus::new("p", refs);
        prop_assert_eq!(status.status.is_failure(), any_failure);
    }

    /// The codec never returns a value for bytes it did not produce, and
    /// always round-trips what it did.
    #[test]
    fn test_value_codec(status in any_result(), when in any::<i64>(), junk in proptest::collection::vec(any::<u8>(), 0..32)) {
        let value = StatusValue::new(status, when);
        let bytes = StatusValueSerializer.serialize(&value).unwrap();
        prop_assert_eq!(StatusValueSerializer.deserialize(&bytes).unwrap(), value);

        if let Ok(decoded) = StatusValueSerializer.deserialize(&junk) {
            prop_assert_eq!(StatusValueSerializer.serialize(&decoded).unwrap(), junk);
        }
    }

    /// Naming styles never leave a separator where they promise not to.
    #[test]
    fn test_naming_styles(project in project_name()) {
        let template = vec!["/srv/${name}.git".to_string()];
        for (style, sep_allowed) in [
            (NamingStyle::Dash, false),
            (NamingStyle::Underscore, false),
            (NamingStyle::BasenameOnly, false),
            (NamingStyle::Slash, true),
        ] {
            let remote = RemoteDestinationConfig::new("r", template.clone(), &[], style).unwrap();
            let dests = remote.destinations(&project);
            prop_assert_eq!(dests.len(), 1);
            let dest = dests.into_iter().next().unwrap();
            let name = dest
                .strip_prefix("/srv/")
                .and_then(|d| d.strip_suffix(".git"))
                .unwrap()
                .to_string();
            prop_assert_eq!(name.contains('/'), sep_allowed && project.contains('/'));
        }
    }
}
