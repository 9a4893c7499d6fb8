//! Session and PKCE verifier cookies.
//!
//! The session cookie carries the provider's opaque access token. ID tokens
//! never leave the process: they are recorded against the access token in a
//! best-effort, instance-local map so logout can hint the provider. A restart
//! or a request served by another instance simply finds no ID token, and
//! logout then clears the local session only.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration as StdDuration, Instant},
};

use tower_cookies::{
    cookie::{
        time::{Duration, OffsetDateTime},
        SameSite,
    },
    Cookie, Cookies,
};

pub const SESSION_COOKIE: &str = "auth_session";
pub const VERIFIER_COOKIE: &str = "code_verifier";

const SESSION_MAX_AGE_SECS: i64 = 24 * 60 * 60;
const VERIFIER_MAX_AGE_SECS: i64 = 10 * 60;

#[derive(Clone)]
pub struct SessionManager {
    secure: bool,
    id_tokens: Arc<Mutex<HashMap<String, IdTokenEntry>>>,
}

struct IdTokenEntry {
    id_token: String,
    recorded_at: Instant,
}

impl SessionManager {
    pub fn new(secure: bool) -> Self {
        Self {
            secure,
            id_tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Builds the session cookie and remembers the ID token for logout.
    pub fn set_session(&self, access_token: &str, id_token: Option<&str>) -> Vec<Cookie<'static>> {
        if let Some(id_token) = id_token {
            let mut tokens = self.tokens();
            let max_age = StdDuration::from_secs(SESSION_MAX_AGE_SECS as u64);
            tokens.retain(|_, entry| entry.recorded_at.elapsed() < max_age);
            tokens.insert(
                access_token.to_string(),
                IdTokenEntry {
                    id_token: id_token.to_string(),
                    recorded_at: Instant::now(),
                },
            );
        }

        vec![self.cookie(
            SESSION_COOKIE,
            access_token.to_string(),
            Duration::seconds(SESSION_MAX_AGE_SECS),
        )]
    }

    /// Expires both the session and the verifier cookie.
    pub fn clear_session(&self, access_token: Option<&str>) -> Vec<Cookie<'static>> {
        if let Some(access_token) = access_token {
            self.tokens().remove(access_token);
        }

        vec![self.expired(SESSION_COOKIE), self.expired(VERIFIER_COOKIE)]
    }

    /// Removes and returns the ID token recorded for the access token.
    pub fn take_id_token(&self, access_token: &str) -> Option<String> {
        self.tokens()
            .remove(access_token)
            .map(|entry| entry.id_token)
    }

    pub fn verifier_cookie(&self, verifier: String) -> Cookie<'static> {
        self.cookie(
            VERIFIER_COOKIE,
            verifier,
            Duration::seconds(VERIFIER_MAX_AGE_SECS),
        )
    }

    pub fn expire_verifier(&self) -> Cookie<'static> {
        self.expired(VERIFIER_COOKIE)
    }

    pub fn read_session(cookies: &Cookies) -> Option<String> {
        read_value(cookies, SESSION_COOKIE)
    }

    pub fn read_verifier(cookies: &Cookies) -> Option<String> {
        read_value(cookies, VERIFIER_COOKIE)
    }

    fn cookie(&self, name: &'static str, value: String, max_age: Duration) -> Cookie<'static> {
        Cookie::build((name, value))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(max_age)
            .build()
    }

    fn expired(&self, name: &'static str) -> Cookie<'static> {
        let mut cookie = self.cookie(name, String::new(), Duration::ZERO);
        cookie.set_expires(OffsetDateTime::UNIX_EPOCH);
        cookie
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<String, IdTokenEntry>> {
        self.id_tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn read_value(cookies: &Cookies, name: &str) -> Option<String> {
    cookies
        .get(name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(cookies: &[Cookie<'static>]) -> Vec<String> {
        cookies.iter().map(|cookie| cookie.to_string()).collect()
    }

    #[test]
    fn session_cookie_carries_hardening_flags() {
        let sessions = SessionManager::new(true);
        let cookies = sessions.set_session("access-1", None);

        assert_eq!(cookies.len(), 1);
        let cookie = &cookies[0];
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.value(), "access-1");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(Duration::seconds(86_400)));
    }

    #[test]
    fn development_cookies_are_not_secure() {
        let sessions = SessionManager::new(false);
        let cookie = sessions.verifier_cookie("verifier".to_string());
        assert_eq!(cookie.secure(), Some(false));
        assert_eq!(cookie.max_age(), Some(Duration::seconds(600)));
        assert_eq!(cookie.http_only(), Some(true));
    }

    #[test]
    fn clear_session_expires_both_cookies() {
        let sessions = SessionManager::new(true);
        let cookies = sessions.clear_session(None);

        let names: Vec<_> = cookies.iter().map(|cookie| cookie.name()).collect();
        assert_eq!(names, vec![SESSION_COOKIE, VERIFIER_COOKIE]);
        for header in rendered(&cookies) {
            assert!(header.contains("Max-Age=0"), "{header}");
            assert!(header.contains("Expires=Thu, 01 Jan 1970 00:00:00 GMT"), "{header}");
            assert!(header.contains("HttpOnly"), "{header}");
            assert!(header.contains("Path=/"), "{header}");
        }
    }

    #[test]
    fn clear_session_forgets_recorded_id_token() {
        let sessions = SessionManager::new(true);
        sessions.set_session("access-1", Some("id-1"));

        let cookies = sessions.clear_session(Some("access-1"));
        assert_eq!(cookies.len(), 2);
        assert_eq!(sessions.take_id_token("access-1"), None);
    }

    #[test]
    fn id_token_is_taken_once() {
        let sessions = SessionManager::new(true);
        sessions.set_session("access-1", Some("id-1"));
        sessions.set_session("access-2", None);

        assert_eq!(sessions.take_id_token("access-2"), None);
        assert_eq!(sessions.take_id_token("access-1").as_deref(), Some("id-1"));
        assert_eq!(sessions.take_id_token("access-1"), None);
    }

    #[test]
    fn clones_share_the_id_token_map() {
        let sessions = SessionManager::new(true);
        let clone = sessions.clone();
        sessions.set_session("access-1", Some("id-1"));

        assert_eq!(clone.take_id_token("access-1").as_deref(), Some("id-1"));
    }
}
