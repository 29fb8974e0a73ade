#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Header, Status};
    use rocket::local::asynchronous::{Client, LocalResponse};
    use serde_json::{Value, json};

    use crate::auth::TokenService;
    use crate::db::users::{delete_user, get_auth_user};
    use crate::test::utils::{STANDARD_PASSWORD, TestEnvBuilder, json_body};

    async fn login(client: &Client, code: &str, password: &str) -> (Status, Value) {
        let response = client
            .post("/api/auth/login")
            .header(ContentType::JSON)
            .body(json!({ "code": code, "password": password }).to_string())
            .dispatch()
            .await;
        let status = response.status();
        (status, json_body(response).await)
    }

    async fn user_count(pool: &sqlx::SqlitePool, code: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE code = ?")
            .bind(code)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn change_password<'c>(
        client: &'c Client,
        auth: Header<'static>,
        body: Value,
    ) -> LocalResponse<'c> {
        client
            .post("/api/me/password")
            .header(auth)
            .header(ContentType::JSON)
            .body(body.to_string())
            .dispatch()
            .await
    }

    #[rocket::async_test]
    async fn local_login_issues_token_and_cookie() {
        let env = TestEnvBuilder::new()
            .user("student", Some("Engenharia"))
            .build()
            .await
            .unwrap();
        let client = env.client().await;

        let response = client
            .post("/api/auth/login")
            .header(ContentType::JSON)
            .body(json!({ "code": "student", "password": STANDARD_PASSWORD }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let cookie = response.cookies().get("auth_token").unwrap().clone();
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.path(), Some("/"));

        let body = json_body(response).await;
        assert_eq!(body["message"], "ok");
        assert_eq!(body["data"]["user"]["code"], "student");
        assert_eq!(body["data"]["needs_profile"], false);
        assert_eq!(body["data"]["needs_password_change"], false);
        let token = body["data"]["token"].as_str().unwrap();
        assert_eq!(env.tokens.verify(token).unwrap(), env.user_id("student"));

        // The tracked client replays the cookie.
        let response = client.get("/api/auth/me").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(json_body(response).await["data"]["code"], "student");

        let response = client.post("/api/auth/logout").dispatch().await;
        assert_eq!(json_body(response).await["message"], "logged-out");
        let response = client.get("/api/auth/me").dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn legacy_account_is_provisioned_once() {
        let env = TestEnvBuilder::new()
            .legacy_account("20231234", "Legacy Student", "cead-pass")
            .build()
            .await
            .unwrap();
        let client = env.client().await;

        let (status, body) = login(&client, "20231234", "cead-pass").await;
        assert_eq!(status, Status::Ok);
        assert_eq!(body["data"]["user"]["role"], "USER");
        assert_eq!(body["data"]["user"]["name"], "Legacy Student");
        assert_eq!(body["data"]["needs_profile"], true);
        assert_eq!(body["data"]["needs_password_change"], false);
        assert_eq!(user_count(&env.pool, "20231234").await, 1);

        // Later logins are served from the local store even if the legacy row disappears.
        sqlx::query("DELETE FROM cead_users")
            .execute(&env.legacy)
            .await
            .unwrap();
        let (status, _) = login(&client, "20231234", "cead-pass").await;
        assert_eq!(status, Status::Ok);
        assert_eq!(user_count(&env.pool, "20231234").await, 1);
    }

    #[rocket::async_test]
    async fn credential_failures_are_indistinguishable() {
        let env = TestEnvBuilder::new()
            .user("student", Some("Engenharia"))
            .legacy_account("legacy", "Legacy", "cead-pass")
            .build()
            .await
            .unwrap();
        let client = env.client().await;

        let attempts = [
            ("student", "wrong-password"),
            ("legacy", "wrong-password"),
            ("nobody", "whatever"),
        ];
        let mut bodies = Vec::new();
        for (code, password) in attempts {
            let (status, body) = login(&client, code, password).await;
            assert_eq!(status, Status::Unauthorized, "{}", code);
            assert_eq!(body["code"], "INVALID_CREDENTIALS");
            bodies.push(body);
        }
        assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(user_count(&env.pool, "legacy").await, 0);
    }

    #[rocket::async_test]
    async fn local_record_shadows_legacy_password() {
        let env = TestEnvBuilder::new()
            .user("shared", Some("Engenharia"))
            .legacy_account("shared", "Old Name", "old-legacy-pass")
            .build()
            .await
            .unwrap();
        let client = env.client().await;

        let (status, body) = login(&client, "shared", "old-legacy-pass").await;
        assert_eq!(status, Status::Unauthorized);
        assert_eq!(body["code"], "INVALID_CREDENTIALS");

        let (status, _) = login(&client, "shared", STANDARD_PASSWORD).await;
        assert_eq!(status, Status::Ok);
    }

    #[rocket::async_test]
    async fn inactive_user_cannot_log_in() {
        let env = TestEnvBuilder::new()
            .inactive_user("dormant")
            .build()
            .await
            .unwrap();
        let client = env.client().await;

        let (status, body) = login(&client, "dormant", STANDARD_PASSWORD).await;
        assert_eq!(status, Status::Forbidden);
        assert_eq!(body["code"], "USER_INACTIVE");
    }

    #[rocket::async_test]
    async fn session_guard_reports_precise_codes() {
        let env = TestEnvBuilder::new()
            .user("student", Some("Engenharia"))
            .user("leaver", None)
            .inactive_user("dormant")
            .build()
            .await
            .unwrap();
        let client = env.client().await;

        let response = client.get("/api/auth/me").dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
        assert_eq!(json_body(response).await["code"], "UNAUTHENTICATED");

        let response = client
            .get("/api/auth/me")
            .header(Header::new("Authorization", "Bearer not-a-jwt"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);
        assert_eq!(json_body(response).await["code"], "INVALID_TOKEN");

        let forged = TokenService::new("some-other-secret", std::time::Duration::from_secs(60))
            .issue(&env.user_id("student"))
            .unwrap();
        let response = client
            .get("/api/auth/me")
            .header(Header::new("Authorization", format!("Bearer {}", forged)))
            .dispatch()
            .await;
        assert_eq!(json_body(response).await["code"], "INVALID_TOKEN");

        let leaver = env.bearer("leaver");
        assert!(delete_user(&env.pool, &env.user_id("leaver")).await.unwrap());
        let response = client.get("/api/auth/me").header(leaver).dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
        assert_eq!(json_body(response).await["code"], "USER_NOT_FOUND");

        let response = client
            .get("/api/auth/me")
            .header(env.bearer("dormant"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);
        assert_eq!(json_body(response).await["code"], "USER_INACTIVE");
    }

    #[rocket::async_test]
    async fn interleaved_guards_resolve_their_own_sessions() {
        let env = TestEnvBuilder::new()
            .user("first", Some("Engenharia"))
            .user("second", Some("Direito"))
            .build()
            .await
            .unwrap();
        let client = env.client().await;

        let (first, second, anonymous) = rocket::tokio::join!(
            client.get("/api/auth/me").header(env.bearer("first")).dispatch(),
            client.get("/api/auth/me").header(env.bearer("second")).dispatch(),
            client.get("/api/auth/me").dispatch(),
        );

        assert_eq!(first.status(), Status::Ok);
        assert_eq!(json_body(first).await["data"]["code"], "first");
        assert_eq!(second.status(), Status::Ok);
        assert_eq!(json_body(second).await["data"]["code"], "second");
        assert_eq!(anonymous.status(), Status::Unauthorized);
        assert_eq!(json_body(anonymous).await["code"], "UNAUTHENTICATED");
    }

    #[rocket::async_test]
    async fn current_semester_overrides_profile_without_persisting() {
        let env = TestEnvBuilder::new()
            .user("student", Some("Engenharia"))
            .semester(2)
            .build()
            .await
            .unwrap();
        let client = env.client().await;

        let response = client
            .get("/api/auth/me")
            .header(env.bearer("student"))
            .dispatch()
            .await;
        assert_eq!(json_body(response).await["data"]["semester"], 2);

        let stored = get_auth_user(&env.pool, &env.user_id("student"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.semester, Some(1));
    }

    #[rocket::async_test]
    async fn profile_completion_clears_onboarding_flag() {
        let env = TestEnvBuilder::new()
            .user("newcomer", None)
            .build()
            .await
            .unwrap();
        let client = env.client().await;

        let response = client
            .get("/api/auth/me")
            .header(env.bearer("newcomer"))
            .dispatch()
            .await;
        assert_eq!(json_body(response).await["data"]["needs_profile"], true);

        let response = client
            .post("/api/me/complete-profile")
            .header(env.bearer("newcomer"))
            .header(ContentType::JSON)
            .body(json!({ "course": "<b>Direito</b>", "year": 2, "semester": 1 }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = json_body(response).await;
        assert_eq!(body["data"]["needs_profile"], false);
        assert_eq!(body["data"]["course"], "Direito");
        assert_eq!(body["data"]["year"], 2);

        let response = client
            .patch("/api/me")
            .header(env.bearer("newcomer"))
            .header(ContentType::JSON)
            .body("{}")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
        assert_eq!(json_body(response).await["code"], "EMPTY_UPDATE");

        let response = client
            .patch("/api/me")
            .header(env.bearer("newcomer"))
            .header(ContentType::JSON)
            .body(json!({ "name": "New Name" }).to_string())
            .dispatch()
            .await;
        let body = json_body(response).await;
        assert_eq!(body["data"]["name"], "New Name");
        assert_eq!(body["data"]["course"], "Direito");
    }

    #[rocket::async_test]
    async fn password_change_rules() {
        let env = TestEnvBuilder::new()
            .user("student", Some("Engenharia"))
            .user_needing_password_change("fresh")
            .build()
            .await
            .unwrap();
        let client = env.client().await;

        let response = change_password(
            &client,
            env.bearer("student"),
            json!({ "new_password": "brand-new" }),
        )
        .await;
        assert_eq!(response.status(), Status::BadRequest);
        assert_eq!(json_body(response).await["code"], "CURRENT_PASSWORD_REQUIRED");

        let response = change_password(
            &client,
            env.bearer("student"),
            json!({ "current_password": "nope", "new_password": "brand-new" }),
        )
        .await;
        assert_eq!(json_body(response).await["code"], "INVALID_CURRENT_PASSWORD");

        let response = change_password(
            &client,
            env.bearer("student"),
            json!({ "current_password": STANDARD_PASSWORD, "new_password": "123" }),
        )
        .await;
        assert_eq!(json_body(response).await["code"], "VALIDATION_ERROR");

        let response = change_password(
            &client,
            env.bearer("student"),
            json!({ "current_password": STANDARD_PASSWORD, "new_password": "brand-new" }),
        )
        .await;
        assert_eq!(response.status(), Status::NoContent);
        assert_eq!(login(&client, "student", "brand-new").await.0, Status::Ok);

        // A pending forced change skips the current password and clears the flag.
        let response = change_password(
            &client,
            env.bearer("fresh"),
            json!({ "new_password": "chosen-by-me" }),
        )
        .await;
        assert_eq!(response.status(), Status::NoContent);
        let (status, body) = login(&client, "fresh", "chosen-by-me").await;
        assert_eq!(status, Status::Ok);
        assert_eq!(body["data"]["needs_password_change"], false);
    }
}
