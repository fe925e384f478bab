//! Router tests for the route guard and the guarded endpoints
//!
//! Each test builds the full router over a temporary sqlite user database and
//! an in-memory session store, then drives it with `oneshot` requests. Sign-in
//! goes through the real endpoints and the session cookie is carried by hand.

#[cfg(test)]
mod tests {
    use crate::{create_router, AppState};
    use audit::{actions, AuditRecorder, MemoryAuditRecorder};
    use authz::{Role, RoutePolicy};
    use axum::{
        body::{to_bytes, Body},
        extract::ConnectInfo,
        http::{header, Method, Request, StatusCode},
        response::Response,
        Router,
    };
    use rate_limit::{RateLimitPolicy, RateLimiter};
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;
    use tower_sessions::MemoryStore;
    use user::{auth::MagicLinkConfig, NewUser, PortalUser, SessionConfig, UserManager};

    const ADMIN_PASSWORD: &str = "correct horse battery";

    struct TestPortal {
        app: Router,
        users: Arc<UserManager>,
        audit: Arc<MemoryAuditRecorder>,
        _dir: TempDir,
    }

    impl TestPortal {
        async fn new() -> Self {
            Self::with_state(|state| state).await
        }

        async fn with_feedback_policy(feedback_policy: RateLimitPolicy) -> Self {
            Self::with_state(move |state| {
                state.with_rate_limit(RateLimiter::in_memory(), feedback_policy)
            })
            .await
        }

        /// Full router over a fresh user database. Proxy headers are trusted
        /// unless `configure` says otherwise, so tests can pick client
        /// addresses with `x-forwarded-for`.
        async fn with_state(configure: impl FnOnce(AppState) -> AppState) -> Self {
            let dir = TempDir::new().unwrap();
            let users = Arc::new(
                UserManager::in_data_dir(
                    dir.path(),
                    SessionConfig::default(),
                    MagicLinkConfig::default(),
                )
                .await
                .unwrap(),
            );
            let audit = Arc::new(MemoryAuditRecorder::new());
            let state = AppState::new(
                users.clone(),
                RoutePolicy::portal_default().unwrap(),
                audit.clone(),
            )
            .with_trusted_proxy(true);
            let session_layer = SessionConfig::default().layer(MemoryStore::default());

            Self {
                app: create_router(configure(state), session_layer),
                users,
                audit,
                _dir: dir,
            }
        }

        async fn send(&self, request: Request<Body>) -> Response {
            self.app.clone().oneshot(request).await.unwrap()
        }

        async fn get(&self, uri: &str, cookie: Option<&str>) -> Response {
            let mut builder = Request::builder().uri(uri);
            if let Some(cookie) = cookie {
                builder = builder.header(header::COOKIE, cookie);
            }
            self.send(builder.body(Body::empty()).unwrap()).await
        }

        async fn post_json(&self, uri: &str, body: Value, cookie: Option<&str>) -> Response {
            let mut builder = Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json");
            if let Some(cookie) = cookie {
                builder = builder.header(header::COOKIE, cookie);
            }
            self.send(builder.body(Body::from(body.to_string())).unwrap())
                .await
        }

        async fn create_user(&self, email: &str, role: Role) -> PortalUser {
            let mut new_user = NewUser::new(email, role);
            if role == Role::Admin {
                new_user = new_user.with_password(ADMIN_PASSWORD);
            }
            self.users.database().create_user(new_user).await.unwrap()
        }

        /// Sign in as a fresh account of `role` and return its session cookie.
        async fn sign_in_as(&self, role: Role) -> (PortalUser, String) {
            let email = format!("{}@example.com", role.as_str().to_ascii_lowercase());
            let user = self.create_user(&email, role).await;

            let response = if role == Role::Admin {
                self.post_json(
                    "/api/v1/auth/sign-in",
                    json!({ "email": email, "password": ADMIN_PASSWORD }),
                    None,
                )
                .await
            } else {
                let link = self
                    .users
                    .magic_links()
                    .issue(self.users.database(), &email)
                    .await
                    .unwrap()
                    .unwrap();
                let uri = format!(
                    "/api/v1/auth/magic-link/verify?token={}&email={}",
                    urlencoding::encode(&link.token),
                    urlencoding::encode(&email)
                );
                self.get(&uri, None).await
            };

            assert!(
                response.status().is_success() || response.status().is_redirection(),
                "sign-in failed: {}",
                response.status()
            );
            (user, session_cookie(&response))
        }

        /// Wait for a background audit write.
        async fn wait_for_action(&self, action: &str) -> audit::AuditEntry {
            for _ in 0..50 {
                if let Some(entry) = self
                    .audit
                    .entries()
                    .await
                    .into_iter()
                    .find(|e| e.action == action)
                {
                    return entry;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("no audit entry for {}", action);
        }
    }

    fn session_cookie(response: &Response) -> String {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with("portal_session="))
            .and_then(|v| v.split(';').next())
            .map(str::to_string)
            .expect("response sets a session cookie")
    }

    fn location(response: &Response) -> &str {
        response.headers()[header::LOCATION].to_str().unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_unauthenticated_page_redirects_to_login() {
        let portal = TestPortal::new().await;

        let response = portal.get("/admin/announcements", None).await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            location(&response),
            "/login?callbackUrl=%2Fadmin%2Fannouncements"
        );
    }

    #[tokio::test]
    async fn test_unauthenticated_api_is_401() {
        let portal = TestPortal::new().await;

        let response = portal.get("/api/v1/audit", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
    }

    #[tokio::test]
    async fn test_trainee_on_admin_page_goes_to_own_dashboard() {
        let portal = TestPortal::new().await;
        let (_, cookie) = portal.sign_in_as(Role::Trainee).await;

        let response = portal.get("/admin", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(location(&response), "/dashboard/trainee");
    }

    #[tokio::test]
    async fn test_trainee_on_admin_api_is_403_and_audited() {
        let portal = TestPortal::new().await;
        let (_, cookie) = portal.sign_in_as(Role::Trainee).await;

        let response = portal
            .post_json(
                "/api/v1/admin/announcements",
                json!({ "title": "t", "body": "b" }),
                Some(&cookie),
            )
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "INSUFFICIENT_ROLE");

        let entry = portal.wait_for_action(actions::ACCESS_DENIED).await;
        assert_eq!(entry.actor_role, Role::Trainee);
        assert_eq!(entry.entity, "route");
        assert_eq!(entry.entity_id.as_deref(), Some("/api/v1/admin/announcements"));
        assert_eq!(entry.meta, Some(json!({ "required": "ADMIN" })));
    }

    #[tokio::test]
    async fn test_public_routes_need_no_session() {
        let portal = TestPortal::new().await;

        assert_eq!(portal.get("/", None).await.status(), StatusCode::OK);
        assert_eq!(portal.get("/login", None).await.status(), StatusCode::OK);
        assert_eq!(
            portal.get("/api/v1/health", None).await.status(),
            StatusCode::OK
        );

        let response = portal
            .post_json(
                "/api/v1/auth/magic-link",
                json!({ "email": "nobody@example.com" }),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_dashboard_redirects_by_role() {
        let portal = TestPortal::new().await;
        let (_, cookie) = portal.sign_in_as(Role::Mentor).await;

        let response = portal.get("/dashboard", Some(&cookie)).await;
        assert_eq!(location(&response), "/dashboard/mentor");

        // Higher ranks reach lower dashboards.
        let response = portal.get("/dashboard/employer", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_me_and_logout() {
        let portal = TestPortal::new().await;
        let (user, cookie) = portal.sign_in_as(Role::Employer).await;

        let response = portal.get("/api/v1/auth/me", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], user.id.as_str());
        assert_eq!(body["role"], "EMPLOYER");
        assert_eq!(body["dashboard"], "/dashboard/employer");

        let response = portal
            .post_json("/api/v1/auth/logout", json!({}), Some(&cookie))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = portal.get("/api/v1/auth/me", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_deactivated_account_loses_access_immediately() {
        let portal = TestPortal::new().await;
        let (user, cookie) = portal.sign_in_as(Role::Mentor).await;
        assert_eq!(
            portal.get("/api/v1/feedback", Some(&cookie)).await.status(),
            StatusCode::OK
        );

        portal
            .users
            .database()
            .set_active(&user.id, false)
            .await
            .unwrap();

        assert_eq!(
            portal.get("/api/v1/feedback", Some(&cookie)).await.status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_wrong_admin_password_is_401() {
        let portal = TestPortal::new().await;
        portal.create_user("admin@example.com", Role::Admin).await;

        let response = portal
            .post_json(
                "/api/v1/auth/sign-in",
                json!({ "email": "admin@example.com", "password": "not the password" }),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_used_sign_in_link_is_rejected() {
        let portal = TestPortal::new().await;
        portal.create_user("trainee@example.com", Role::Trainee).await;
        let link = portal
            .users
            .magic_links()
            .issue(portal.users.database(), "trainee@example.com")
            .await
            .unwrap()
            .unwrap();
        let uri = format!(
            "/api/v1/auth/magic-link/verify?token={}&email=trainee%40example.com",
            urlencoding::encode(&link.token)
        );

        let first = portal.get(&uri, None).await;
        assert_eq!(location(&first), "/dashboard/trainee");

        let second = portal.get(&uri, None).await;
        assert_eq!(location(&second), "/login?error=invalid_link");
    }

    #[tokio::test]
    async fn test_announcements_created_and_listed() {
        let portal = TestPortal::new().await;
        let (_, admin) = portal.sign_in_as(Role::Admin).await;
        let (_, trainee) = portal.sign_in_as(Role::Trainee).await;

        let response = portal
            .post_json(
                "/api/v1/admin/announcements",
                json!({ "title": "Mentors only", "body": "...", "audience": "MENTOR" }),
                Some(&admin),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let response = portal
            .post_json(
                "/api/v1/admin/announcements",
                json!({ "title": "Welcome", "body": "Hello everyone" }),
                Some(&admin),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = portal.get("/api/v1/announcements", Some(&trainee)).await;
        let body = body_json(response).await;
        let titles: Vec<&str> = body["announcements"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["Welcome"]);

        let creates: Vec<_> = portal
            .audit
            .entries()
            .await
            .into_iter()
            .filter(|e| e.action == actions::ANNOUNCEMENT_CREATE)
            .collect();
        assert_eq!(creates.len(), 2);
        assert!(creates.iter().all(|e| e.actor_role == Role::Admin));
    }

    #[tokio::test]
    async fn test_feedback_rate_limited_per_address() {
        let portal = TestPortal::new().await;
        let trainee = portal.create_user("trainee@example.com", Role::Trainee).await;

        let submit = |ip: &'static str| {
            let body = json!({
                "trainee_id": trainee.id,
                "rating": 5,
                "comment": "Very helpful",
            });
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/public/feedback")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-forwarded-for", ip)
                .body(Body::from(body.to_string()))
                .unwrap()
        };

        for _ in 0..5 {
            let response = portal.send(submit("1.2.3.4")).await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = portal.send(submit("1.2.3.4")).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = response.headers()[header::RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry_after > 0 && retry_after <= 901);

        let response = portal.send(submit("5.6.7.8")).await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_feedback_validation() {
        let portal = TestPortal::new().await;
        let trainee = portal.create_user("trainee@example.com", Role::Trainee).await;
        let mentor = portal.create_user("mentor@example.com", Role::Mentor).await;

        let response = portal
            .post_json(
                "/api/v1/public/feedback",
                json!({ "trainee_id": trainee.id, "rating": 6, "comment": "ok" }),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = portal
            .post_json(
                "/api/v1/public/feedback",
                json!({ "trainee_id": mentor.id, "rating": 4, "comment": "ok" }),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_feedback_export_requires_admin_and_is_audited() {
        let portal = TestPortal::with_feedback_policy(RateLimitPolicy::new(100, 60_000).unwrap()).await;
        let trainee = portal
            .users
            .database()
            .create_user(NewUser::new("sam@example.com", Role::Trainee).with_name("Sam"))
            .await
            .unwrap();
        let response = portal
            .post_json(
                "/api/v1/public/feedback",
                json!({
                    "trainee_id": trainee.id,
                    "rating": 4,
                    "comment": "Quick, friendly",
                    "receipt_code": "R-42",
                }),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let (_, mentor) = portal.sign_in_as(Role::Mentor).await;
        assert_eq!(
            portal
                .get("/api/v1/feedback/export", Some(&mentor))
                .await
                .status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            portal.get("/api/v1/feedback", Some(&mentor)).await.status(),
            StatusCode::OK
        );

        let (_, admin) = portal.sign_in_as(Role::Admin).await;
        let response = portal.get("/api/v1/feedback/export", Some(&admin)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/csv"));
        let csv = body_text(response).await;
        assert!(csv.starts_with("traineeName,rating,comment,receiptCode,createdAt\n"));
        assert!(csv.contains("Sam,4,\"Quick, friendly\",R-42,"));

        let export = portal
            .audit
            .entries()
            .await
            .into_iter()
            .find(|e| e.action == actions::FEEDBACK_EXPORT)
            .unwrap();
        assert_eq!(export.actor_role, Role::Admin);
        assert_eq!(export.meta, Some(json!({ "rows": 1 })));
    }

    #[tokio::test]
    async fn test_admin_creates_user() {
        let portal = TestPortal::new().await;
        let (_, admin) = portal.sign_in_as(Role::Admin).await;

        let response = portal
            .post_json(
                "/api/v1/admin/users",
                json!({ "email": "New.Trainee@Example.com", "role": "TRAINEE" }),
                Some(&admin),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["email"], "new.trainee@example.com");

        let response = portal
            .post_json(
                "/api/v1/admin/users",
                json!({ "email": "new.trainee@example.com", "role": "TRAINEE" }),
                Some(&admin),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let recent = portal.audit.recent(10).await.unwrap();
        assert!(recent.iter().any(|e| e.action == actions::USER_CREATE));
    }

    #[tokio::test]
    async fn test_audit_listing_for_admin() {
        let portal = TestPortal::new().await;
        let (_, admin) = portal.sign_in_as(Role::Admin).await;

        let response = portal.get("/api/v1/audit?limit=5", Some(&admin)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let entries = body["entries"].as_array().unwrap();
        assert_eq!(entries[0]["action"], actions::AUTH_SIGN_IN);
    }

    fn post_from(uri: &str, ip: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", ip)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn count_link_tokens(portal: &TestPortal) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM magic_link_tokens")
            .fetch_one(portal.users.database().pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_sign_in_link_requests_rate_limited_before_issuing() {
        let portal = TestPortal::new().await;
        portal.create_user("trainee@example.com", Role::Trainee).await;
        let body = json!({ "email": "trainee@example.com" });

        for _ in 0..RateLimitPolicy::AUTH_LIMIT {
            let response = portal
                .send(post_from("/api/v1/auth/magic-link", "1.2.3.4", body.clone()))
                .await;
            assert_eq!(response.status(), StatusCode::ACCEPTED);
        }
        assert_eq!(count_link_tokens(&portal).await, 5);

        let response = portal
            .send(post_from("/api/v1/auth/magic-link", "1.2.3.4", body.clone()))
            .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
        let error = body_json(response).await;
        assert_eq!(error["error"]["code"], "RATE_LIMITED");
        // The refused request never reached the token table.
        assert_eq!(count_link_tokens(&portal).await, 5);

        let response = portal
            .send(post_from("/api/v1/auth/magic-link", "5.6.7.8", body))
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_password_sign_in_rate_limited() {
        let portal = TestPortal::new().await;
        portal.create_user("admin@example.com", Role::Admin).await;
        let wrong = json!({ "email": "admin@example.com", "password": "guess" });

        for _ in 0..RateLimitPolicy::AUTH_LIMIT {
            let response = portal
                .send(post_from("/api/v1/auth/sign-in", "1.2.3.4", wrong.clone()))
                .await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        // Even the right password is refused once the address is limited.
        let right = json!({ "email": "admin@example.com", "password": ADMIN_PASSWORD });
        let response = portal
            .send(post_from("/api/v1/auth/sign-in", "1.2.3.4", right.clone()))
            .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = portal
            .send(post_from("/api/v1/auth/sign-in", "5.6.7.8", right))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_forwarded_header_ignored_without_trusted_proxy() {
        let portal = TestPortal::with_state(|state| state.with_trusted_proxy(false)).await;
        let trainee = portal.create_user("trainee@example.com", Role::Trainee).await;

        let submit = |forwarded: &str| {
            let mut request = post_from(
                "/api/v1/public/feedback",
                forwarded,
                json!({ "trainee_id": trainee.id, "rating": 5, "comment": "Great" }),
            );
            let peer: SocketAddr = "203.0.113.7:40000".parse().unwrap();
            request.extensions_mut().insert(ConnectInfo(peer));
            request
        };

        for i in 0..RateLimitPolicy::FEEDBACK_LIMIT {
            let response = portal.send(submit(&format!("10.0.0.{}", i))).await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }
        // A fresh forwarded address does not buy a fresh bucket.
        let response = portal.send(submit("10.0.0.99")).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_session_resolution_failure_denies() {
        let portal = TestPortal::new().await;
        let (_, admin) = portal.sign_in_as(Role::Admin).await;
        assert_eq!(
            portal.get("/api/v1/audit", Some(&admin)).await.status(),
            StatusCode::OK
        );

        // The cookie still names a live session, but the user lookup fails.
        portal.users.database().pool().close().await;

        let response = portal.get("/admin", Some(&admin)).await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(location(&response), "/login?callbackUrl=%2Fadmin");

        let response = portal.get("/api/v1/audit", Some(&admin)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_every_checked_path_is_mounted() {
        let portal = TestPortal::new().await;
        let (_, admin) = portal.sign_in_as(Role::Admin).await;

        for path in crate::routed_paths() {
            let response = portal.get(path, Some(&admin)).await;
            assert_ne!(
                response.status(),
                StatusCode::NOT_FOUND,
                "{} is covered by the policy check but not routed",
                path
            );
        }
    }

    #[tokio::test]
    async fn test_response_hooks_add_headers() {
        let portal = TestPortal::new().await;

        let response = portal.get("/api/v1/health", None).await;
        assert!(response.headers().contains_key(crate::middleware_hooks::VERSION_HEADER));
        assert!(response
            .headers()
            .contains_key(crate::middleware_hooks::REQUEST_ID_HEADER));
    }
}
