#[cfg(test)]
mod tests {
    use rocket::http::Status;

    use crate::db::materials::get_material;
    use crate::models::{MaterialKind, Visibility};
    use crate::storage::{ImageFormat, StagedFile, UploadBatch, check_cover_claim};
    use crate::test::utils::{
        Multipart, TestEnv, TestEnvBuilder, files_in, json_body, pdf_bytes, png_bytes,
    };

    async fn staff_env() -> TestEnv {
        TestEnvBuilder::new()
            .content_manager("manager")
            .user("student", Some("Engenharia"))
            .build()
            .await
            .unwrap()
    }

    async fn material_count(env: &TestEnv) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM materials")
            .fetch_one(&env.pool)
            .await
            .unwrap()
    }

    fn module_form(cover: Option<(&str, &str, Vec<u8>)>) -> Multipart {
        let form = Multipart::new()
            .text("title", "Calculus I")
            .text("kind", "MODULE")
            .text("visibility", "PUBLIC")
            .text("course", "Engenharia")
            .text("year", "1")
            .text("semester", "1")
            .file("pdf", "calculus.pdf", "application/pdf", &pdf_bytes(256));
        match cover {
            Some((name, mime, bytes)) => form.file("cover", name, mime, &bytes),
            None => form,
        }
    }

    fn staged(file_name: &str, content_type: &str) -> StagedFile {
        StagedFile {
            path: "/nonexistent".into(),
            file_name: Some(file_name.to_string()),
            content_type: Some(content_type.to_string()),
        }
    }

    #[test]
    fn cover_claim_requires_matching_families() {
        assert_eq!(
            check_cover_claim(&staged("a.JPG", "image/jpeg")).unwrap(),
            ImageFormat::Jpeg
        );
        assert_eq!(
            check_cover_claim(&staged("a.webp", "image/webp")).unwrap(),
            ImageFormat::Webp
        );
        assert_eq!(
            check_cover_claim(&staged("a.png", "image/jpeg")).unwrap_err().code(),
            "INVALID_COVER"
        );
        assert_eq!(
            check_cover_claim(&staged("a.gif", "image/gif")).unwrap_err().code(),
            "INVALID_COVER"
        );
    }

    #[test]
    fn signatures_are_sniffed_from_leading_bytes() {
        assert_eq!(ImageFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::sniff(&png_bytes(1, 1)[..8]), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::sniff(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageFormat::Webp));
        assert_eq!(ImageFormat::sniff(b"GIF89a"), None);
        assert!(crate::storage::is_pdf_signature(b"%PDF-1.7"));
        assert!(!crate::storage::is_pdf_signature(b"PK\x03\x04"));
    }

    #[test]
    fn dropped_batch_removes_registered_files() {
        let dir = tempfile::tempdir().unwrap();
        let kept = dir.path().join("kept.pdf");
        let discarded = dir.path().join("discarded.pdf");
        std::fs::write(&kept, b"%PDF").unwrap();
        std::fs::write(&discarded, b"%PDF").unwrap();

        let mut committed = UploadBatch::new();
        committed.register(kept.clone());
        committed.commit();

        let mut abandoned = UploadBatch::new();
        abandoned.register(discarded.clone());
        abandoned.register(dir.path().join("never-written.jpg"));
        drop(abandoned);

        assert!(kept.exists());
        assert!(!discarded.exists());
    }

    #[rocket::async_test]
    async fn module_upload_transcodes_cover_and_forces_private() {
        let env = staff_env().await;
        let client = env.client().await;

        let form = module_form(Some(("cover.png", "image/png", png_bytes(1600, 800))));
        let response = client
            .post("/api/materials")
            .header(env.bearer("manager"))
            .header(form.content_type())
            .body(form.finish())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Created);
        let body = json_body(response).await;
        let id = body["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(body["data"]["visibility"], "PRIVATE");
        assert_eq!(body["data"]["has_cover"], true);

        let stored = get_material(&env.pool, &id).await.unwrap().unwrap();
        assert_eq!(stored.kind, MaterialKind::Module);
        assert_eq!(stored.visibility, Visibility::Private);

        let covers = files_in(&env.cover_dir());
        assert_eq!(covers.len(), 1, "only the transcoded cover remains: {:?}", covers);
        assert_eq!(Some(covers[0].as_str()), stored.cover_path.as_deref());
        assert!(covers[0].ends_with(".jpg"));

        let cover = image::open(env.cover_dir().join(&covers[0])).unwrap();
        assert_eq!((cover.width(), cover.height()), (1200, 600));
        assert_eq!(files_in(&env.pdf_dir()), vec![stored.pdf_path.clone()]);
    }

    #[rocket::async_test]
    async fn precondition_failures_leave_nothing_behind() {
        let env = staff_env().await;
        let client = env.client().await;

        let cases = vec![
            (module_form(None), "COVER_REQUIRED"),
            (
                module_form(Some(("cover.png", "image/jpeg", png_bytes(4, 4)))),
                "INVALID_COVER",
            ),
            (
                module_form(Some(("cover.png", "image/png", b"not an image".to_vec()))),
                "INVALID_COVER_SIGNATURE",
            ),
            (
                Multipart::new()
                    .text("title", "Fake")
                    .text("kind", "PUBLICATION")
                    .text("material_type", "BOOK")
                    .file("pdf", "fake.pdf", "application/pdf", b"PK\x03\x04 zip"),
                "INVALID_PDF",
            ),
            (
                Multipart::new()
                    .text("title", "No type")
                    .text("kind", "PUBLICATION")
                    .file("pdf", "doc.pdf", "application/pdf", &pdf_bytes(10)),
                "MATERIAL_TYPE_REQUIRED",
            ),
            (
                Multipart::new().text("title", "No file").text("kind", "PUBLICATION"),
                "PDF_REQUIRED",
            ),
        ];

        for (form, code) in cases {
            let response = client
                .post("/api/materials")
                .header(env.bearer("manager"))
                .header(form.content_type())
                .body(form.finish())
                .dispatch()
                .await;
            assert_eq!(response.status(), Status::BadRequest, "{}", code);
            assert_eq!(json_body(response).await["code"], code);
        }

        assert_eq!(material_count(&env).await, 0);
        assert!(files_in(&env.pdf_dir()).is_empty());
        assert!(files_in(&env.cover_dir()).is_empty());
    }

    #[rocket::async_test]
    async fn transcode_failure_rolls_back_every_file() {
        let env = staff_env().await;
        let client = env.client().await;

        // Valid PNG signature, truncated body.
        let mut broken = png_bytes(32, 32);
        broken.truncate(24);
        let form = module_form(Some(("cover.png", "image/png", broken)));

        let response = client
            .post("/api/materials")
            .header(env.bearer("manager"))
            .header(form.content_type())
            .body(form.finish())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::InternalServerError);
        let body = json_body(response).await;
        assert_eq!(body["code"], "INTERNAL_ERROR");
        assert_eq!(body["message"], "Internal server error");

        assert_eq!(material_count(&env).await, 0);
        assert!(files_in(&env.pdf_dir()).is_empty());
        assert!(files_in(&env.cover_dir()).is_empty());
    }

    #[rocket::async_test]
    async fn catalog_write_failure_discards_stored_files() {
        let env = staff_env().await;
        let client = env.client().await;

        sqlx::query(
            "CREATE TRIGGER refuse_materials BEFORE INSERT ON materials \
             BEGIN SELECT RAISE(ABORT, 'catalog unavailable'); END",
        )
        .execute(&env.pool)
        .await
        .unwrap();

        let form = module_form(Some(("cover.png", "image/png", png_bytes(64, 32))));
        let response = client
            .post("/api/materials")
            .header(env.bearer("manager"))
            .header(form.content_type())
            .body(form.finish())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::InternalServerError);
        assert_eq!(json_body(response).await["code"], "INTERNAL_ERROR");

        assert_eq!(material_count(&env).await, 0);
        assert!(files_in(&env.pdf_dir()).is_empty());
        assert!(files_in(&env.cover_dir()).is_empty());
    }

    #[rocket::async_test]
    async fn only_staff_may_upload() {
        let env = staff_env().await;
        let client = env.client().await;

        let form = module_form(Some(("cover.png", "image/png", png_bytes(4, 4))));
        let response = client
            .post("/api/materials")
            .header(env.bearer("student"))
            .header(form.content_type())
            .body(form.finish())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Forbidden);
        assert_eq!(json_body(response).await["code"], "FORBIDDEN");
        assert_eq!(material_count(&env).await, 0);
        assert!(files_in(&env.pdf_dir()).is_empty());
    }
}
