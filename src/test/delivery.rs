#[cfg(test)]
mod tests {
    use rocket::http::{Header, Status};

    use crate::models::Visibility;
    use crate::storage::{ByteRange, resolve_range};
    use crate::test::utils::{MaterialSeed, TestEnvBuilder, json_body, pdf_bytes, png_bytes};

    fn unsatisfiable(header: &str, size: u64) -> bool {
        matches!(
            resolve_range(header, size),
            Err(crate::error::AppError::RangeNotSatisfiable { size: s }) if s == size
        )
    }

    #[test]
    fn range_bounds_default_to_file_edges() {
        assert_eq!(
            resolve_range("bytes=0-", 100).unwrap(),
            ByteRange { start: 0, end: 99 }
        );
        assert_eq!(
            resolve_range("bytes=10-19", 100).unwrap(),
            ByteRange { start: 10, end: 19 }
        );
        assert_eq!(
            resolve_range("bytes=-49", 100).unwrap(),
            ByteRange { start: 0, end: 49 }
        );
        assert_eq!(resolve_range("bytes=99-99", 100).unwrap().len(), 1);
    }

    #[test]
    fn malformed_or_out_of_bounds_ranges_are_unsatisfiable() {
        assert!(unsatisfiable("bytes=100-", 100));
        assert!(unsatisfiable("bytes=0-100", 100));
        assert!(unsatisfiable("bytes=20-10", 100));
        assert!(unsatisfiable("bytes=0-1,5-6", 100));
        assert!(unsatisfiable("items=0-1", 100));
        assert!(unsatisfiable("bytes=abc", 100));
        assert!(unsatisfiable("bytes=0-", 0));
    }

    #[rocket::async_test]
    async fn full_pdf_is_served_inline_without_caching() {
        let bytes = pdf_bytes(500);
        let env = TestEnvBuilder::new()
            .user("reader", Some("Engenharia"))
            .material(
                "book",
                MaterialSeed::publication(Visibility::Public, None).pdf(bytes.clone()),
            )
            .build()
            .await
            .unwrap();
        let client = env.client().await;
        let id = env.material_id("book");

        let response = client
            .get(format!("/api/materials/{}/pdf", id))
            .header(env.bearer("reader"))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        let headers = response.headers();
        assert_eq!(headers.get_one("Content-Type"), Some("application/pdf"));
        assert_eq!(
            headers.get_one("Content-Disposition"),
            Some(format!("inline; filename=\"material-{}.pdf\"", id).as_str())
        );
        assert_eq!(headers.get_one("Cache-Control"), Some("no-store"));
        assert_eq!(headers.get_one("Pragma"), Some("no-cache"));
        assert_eq!(headers.get_one("X-Content-Type-Options"), Some("nosniff"));
        assert_eq!(headers.get_one("Accept-Ranges"), Some("bytes"));
        assert_eq!(response.into_bytes().await.unwrap(), bytes);
    }

    #[rocket::async_test]
    async fn range_request_returns_exact_span() {
        let bytes = pdf_bytes(1000);
        let total = bytes.len();
        let env = TestEnvBuilder::new()
            .user("reader", Some("Engenharia"))
            .material(
                "book",
                MaterialSeed::publication(Visibility::Public, None).pdf(bytes.clone()),
            )
            .build()
            .await
            .unwrap();
        let client = env.client().await;
        let uri = format!("/api/materials/{}/pdf", env.material_id("book"));

        let response = client
            .get(uri.clone())
            .header(env.bearer("reader"))
            .header(Header::new("Range", "bytes=100-199"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::PartialContent);
        assert_eq!(
            response.headers().get_one("Content-Range"),
            Some(format!("bytes 100-199/{}", total).as_str())
        );
        assert_eq!(response.headers().get_one("Content-Length"), Some("100"));
        assert_eq!(response.into_bytes().await.unwrap(), bytes[100..200].to_vec());

        let response = client
            .get(uri.clone())
            .header(env.bearer("reader"))
            .header(Header::new("Range", "bytes=0-"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::PartialContent);
        assert_eq!(response.into_bytes().await.unwrap(), bytes);

        let response = client
            .get(uri)
            .header(env.bearer("reader"))
            .header(Header::new("Range", format!("bytes={}-", total)))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::RangeNotSatisfiable);
        assert_eq!(
            response.headers().get_one("Content-Range"),
            Some(format!("bytes */{}", total).as_str())
        );
        assert!(response.into_bytes().await.unwrap_or_default().is_empty());
    }

    #[rocket::async_test]
    async fn missing_files_report_specific_codes() {
        let env = TestEnvBuilder::new()
            .user("reader", Some("Engenharia"))
            .material(
                "ghost",
                MaterialSeed::publication(Visibility::Public, None).without_pdf_file(),
            )
            .build()
            .await
            .unwrap();
        let client = env.client().await;
        let id = env.material_id("ghost");

        let response = client
            .get(format!("/api/materials/{}/pdf", id))
            .header(env.bearer("reader"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);
        assert_eq!(json_body(response).await["code"], "PDF_NOT_FOUND");

        let response = client
            .get(format!("/api/materials/{}/cover", id))
            .header(env.bearer("reader"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);
        assert_eq!(json_body(response).await["code"], "COVER_NOT_FOUND");
    }

    #[rocket::async_test]
    async fn non_pdf_stored_file_is_refused() {
        let env = TestEnvBuilder::new()
            .user("reader", Some("Engenharia"))
            .material("notes", MaterialSeed::publication(Visibility::Public, None))
            .build()
            .await
            .unwrap();
        let client = env.client().await;
        let id = env.material_id("notes");

        std::fs::write(env.pdf_dir().join("notes.txt"), b"plain text").unwrap();
        sqlx::query("UPDATE materials SET pdf_path = ? WHERE id = ?")
            .bind("notes.txt")
            .bind(&id)
            .execute(&env.pool)
            .await
            .unwrap();

        let response = client
            .get(format!("/api/materials/{}/pdf", id))
            .header(env.bearer("reader"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
        assert_eq!(json_body(response).await["code"], "INVALID_PDF");
    }

    #[rocket::async_test]
    async fn denied_material_never_streams() {
        let env = TestEnvBuilder::new()
            .user("outsider", Some("Direito"))
            .material(
                "private",
                MaterialSeed::publication(Visibility::Private, Some("Engenharia"))
                    .cover(png_bytes(4, 4)),
            )
            .build()
            .await
            .unwrap();
        let client = env.client().await;
        let id = env.material_id("private");

        for suffix in ["", "/pdf", "/cover", "/reader-url"] {
            let response = client
                .get(format!("/api/materials/{}{}", id, suffix))
                .header(env.bearer("outsider"))
                .dispatch()
                .await;
            assert_eq!(response.status(), Status::Forbidden, "suffix {:?}", suffix);
            assert_eq!(json_body(response).await["code"], "FORBIDDEN");
        }
    }

    #[rocket::async_test]
    async fn cover_is_served_with_image_type() {
        let cover = png_bytes(8, 8);
        let env = TestEnvBuilder::new()
            .user("reader", Some("Engenharia"))
            .material(
                "module",
                MaterialSeed::module("Engenharia").cover(cover.clone()),
            )
            .build()
            .await
            .unwrap();
        let client = env.client().await;

        let response = client
            .get(format!("/api/materials/{}/cover", env.material_id("module")))
            .header(env.bearer("reader"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.headers().get_one("Content-Type"), Some("image/png"));
        assert_eq!(response.into_bytes().await.unwrap(), cover);
    }
}
