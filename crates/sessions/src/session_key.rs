//! Session key scheme.
//!
//! Two key shapes route all traffic:
//! - `<channel>:<peer>` — one conversation per channel/peer pair
//! - `cron:<jobId>:<runId>` — an isolated session for one scheduled run

/// Build the routing key for a channel conversation.
pub fn for_channel(channel: &str, peer: &str) -> String {
    format!("{}:{}", sanitize(channel), sanitize(peer))
}

/// Build the isolation key for a scheduled run.
pub fn for_cron(job_id: &str, run_id: &str) -> String {
    format!("cron:{job_id}:{run_id}")
}

/// Whether a key belongs to a cron-isolated session.
pub fn is_cron(session_key: &str) -> bool {
    session_key.starts_with("cron:")
}

/// The channel label portion of a key, when present.
pub fn channel_of(session_key: &str) -> Option<&str> {
    let (channel, _) = session_key.split_once(':')?;
    if channel.is_empty() || channel == "cron" {
        return None;
    }
    Some(channel)
}

/// The peer/target portion of a `<channel>:<peer>` key.
pub fn peer_of(session_key: &str) -> Option<&str> {
    if is_cron(session_key) {
        return None;
    }
    session_key.split_once(':').map(|(_, peer)| peer)
}

/// Keys become file names; strip separators that would break that.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c == ':' || c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_key_shape() {
        assert_eq!(for_channel("telegram", "42"), "telegram:42");
    }

    #[test]
    fn cron_key_shape() {
        assert_eq!(for_cron("job1", "run9"), "cron:job1:run9");
        assert!(is_cron(&for_cron("job1", "run9")));
    }

    #[test]
    fn channel_of_extracts_label() {
        assert_eq!(channel_of("telegram:42"), Some("telegram"));
        assert_eq!(channel_of("cron:j:r"), None);
        assert_eq!(channel_of("nocolon"), None);
    }

    #[test]
    fn peer_of_extracts_target() {
        assert_eq!(peer_of("telegram:42"), Some("42"));
        assert_eq!(peer_of("cron:j:r"), None);
    }

    #[test]
    fn separators_in_parts_are_sanitized() {
        assert_eq!(for_channel("a:b", "c/d"), "a_b:c_d");
    }
}
