use chrono::{DateTime, TimeZone, Utc};

use crate::{
    chain::Receipt,
    config::{ConfigError, Settings},
    feed::{fallback_name, FeedPost, ProfileView, SuggestedUser},
};

/// `5m ago` style age of a ledger timestamp (seconds since the epoch).
pub fn ago(timestamp: u64, now: DateTime<Utc>) -> String {
    let Some(then) = i64::try_from(timestamp)
        .ok()
        .and_then(|t| Utc.timestamp_opt(t, 0).single())
    else {
        return "some time ago".to_owned();
    };

    let age = now.signed_duration_since(then);
    match age.num_seconds() {
        s if s < 60 => "just now".to_owned(),
        s if s < 3600 => format!("{}m ago", s / 60),
        s if s < 86400 => format!("{}h ago", s / 3600),
        s if s < 7 * 86400 => format!("{}d ago", s / 86400),
        _ => then.format("%Y-%m-%d").to_string(),
    }
}

pub fn post(p: &FeedPost, now: DateTime<Utc>) -> String {
    let mut out = format!(
        "#{} {} ({}) · {}\n",
        p.id,
        p.username,
        p.author.abbreviated(),
        ago(p.timestamp, now)
    );

    if !p.text.is_empty() {
        out.push_str(&p.text);
        out.push('\n');
    }
    if let Some(url) = &p.media_url {
        out.push_str(&format!("[media] {url}\n"));
    } else if p.media_missing() {
        out.push_str("[media] not loaded");
        if p.media_retries > 0 {
            out.push_str(&format!(", Retry ({})", p.media_retries));
        }
        out.push_str(&format!(" (pointer {})\n", p.content));
    }

    let heart = if p.liked { "♥" } else { "♡" };
    out.push_str(&format!("{heart} {}", p.like_count));
    out
}

pub fn feed(posts: &[FeedPost]) {
    if posts.is_empty() {
        println!("No posts yet. Be the first to share something!");
        return;
    }

    let now = Utc::now();
    for p in posts {
        println!("{}\n", post(p, now));
    }
}

pub fn user(u: &SuggestedUser) -> String {
    format!(
        "{} ({}){}\n  {}",
        u.username,
        u.address.abbreviated(),
        if u.following { " · following" } else { "" },
        u.bio
    )
}

pub fn users(users: &[SuggestedUser]) {
    if users.is_empty() {
        println!("No one to suggest right now.");
    }
    for u in users {
        println!("{}", user(u));
    }
}

pub fn profile(view: &ProfileView) {
    match &view.profile {
        Some(p) => {
            println!("{} ({})", p.username, view.address);
            if !p.bio.is_empty() {
                println!("{}", p.bio);
            }
        }
        None => println!("{} ({}) has no profile", fallback_name(&view.address), view.address),
    }
    if let Some(url) = &view.avatar_url {
        println!("avatar: {url}");
    }

    let ids: Vec<String> = view.post_ids.iter().map(|id| format!("#{id}")).collect();
    println!("{} posts {}", ids.len(), ids.join(" "));
}

pub fn receipt(r: &Receipt) {
    match r.block_number {
        Some(block) => println!("Confirmed {} in block {block}", r.tx_hash),
        None => println!("Confirmed {}", r.tx_hash),
    }
    for event in &r.events {
        println!("  {event:?}");
    }
}

pub fn settings(s: &Settings) {
    let width = s.describe().iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (key, value) in s.describe() {
        println!("{key:<width$}  {value}");
    }
}

/// Blocking screen shown instead of any other output.
pub fn config_error(e: &ConfigError) {
    eprintln!("Configuration error\n");
    eprintln!("{e}\n");
    for (n, step) in e.remediation().iter().enumerate() {
        eprintln!("  {}. {step}", n + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{content::ContentPointer, testutil::addr};

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn sample() -> FeedPost {
        FeedPost {
            id: 3,
            author: addr(1),
            username: "alice".into(),
            avatar_url: None,
            text: "gm".into(),
            content: ContentPointer::default(),
            media_url: None,
            timestamp: 1_700_000_000 - 120,
            like_count: 2,
            liked: true,
            media_retries: 0,
        }
    }

    #[test]
    fn ages_are_relative() {
        let now = now();
        let ts = 1_700_000_000u64;

        assert_eq!(ago(ts - 5, now), "just now");
        assert_eq!(ago(ts - 300, now), "5m ago");
        assert_eq!(ago(ts - 7200, now), "2h ago");
        assert_eq!(ago(ts - 3 * 86400, now), "3d ago");
        assert_eq!(ago(0, now), "1970-01-01");
    }

    #[test]
    fn post_shows_likes_and_age() {
        let out = post(&sample(), now());

        assert!(out.starts_with("#3 alice (0xab00...0001) · 2m ago"));
        assert!(out.ends_with("♥ 2"));
        assert!(!out.contains("[media]"));
    }

    #[test]
    fn missing_media_offers_retry() {
        let mut p = sample();
        p.content = "file-1".into();
        p.media_retries = 2;

        assert!(post(&p, now()).contains("[media] not loaded, Retry (2) (pointer file-1)"));

        p.media_url = Some("https://gw.example/ipfs/bafy".into());
        assert!(post(&p, now()).contains("[media] https://gw.example/ipfs/bafy"));
    }

    #[test]
    fn suggested_user_line() {
        let u = SuggestedUser {
            address: addr(2),
            username: "bob".into(),
            bio: "Web3 creator".into(),
            avatar_url: None,
            following: true,
        };

        assert_eq!(user(&u), "bob (0xab00...0002) · following\n  Web3 creator");
    }
}
