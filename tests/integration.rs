//! HTTP integration tests
//!
//! Drive the full router (real converter, temp folders) with axum's
//! `oneshot` helper and hand-built multipart bodies.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use image::{ImageFormat, Rgba, RgbaImage};
use image_converter::config::Config;
use image_converter::server::{create_router, AppContext};
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::io::{Cursor, Read};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "image-converter-test-boundary";

fn create_test_app() -> (TempDir, Config, Router) {
    let dir = TempDir::new().unwrap();
    let config = Config {
        upload_dir: dir.path().join("uploads"),
        converted_dir: dir.path().join("converted"),
        ..Config::default()
    };
    let ctx = AppContext::from_config(config.clone()).unwrap();
    (dir, config, create_router(ctx))
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([30, 120, 200, 128]));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

enum Part<'a> {
    File(&'a str, Vec<u8>),
    Text(&'a str, &'a str),
}

fn multipart_body(parts: Vec<Part<'_>>) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File(filename, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        filename
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(&data);
            }
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}",
                        name, value
                    )
                    .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(parts: Vec<Part<'_>>) -> Request<Body> {
    Request::post("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

async fn body_bytes(body: Body) -> Vec<u8> {
    body.collect().await.unwrap().to_bytes().to_vec()
}

async fn body_json(body: Body) -> Value {
    serde_json::from_slice(&body_bytes(body).await).unwrap()
}

fn staged_files(config: &Config) -> usize {
    std::fs::read_dir(&config.upload_dir).unwrap().count()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_dir, _config, app) = create_test_app();

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_formats_endpoint() {
    let (_dir, _config, app) = create_test_app();

    let response = app
        .oneshot(Request::get("/api/formats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response.into_body()).await;
    assert_eq!(
        json["formats"],
        serde_json::json!(["PNG", "JPEG", "BMP", "GIF", "TIFF", "WEBP", "ICO"])
    );
    assert_eq!(json["ico_sizes"], serde_json::json!([16, 32, 48, 64, 128, 256]));
    assert_eq!(json["default_quality"], 85);
    assert_eq!(json["default_format"], "JPEG");
    assert_eq!(json["max_image_dimension"], 5000);
}

#[tokio::test]
async fn test_single_upload_converts_and_downloads() {
    let (_dir, config, app) = create_test_app();

    let response = app
        .clone()
        .oneshot(upload_request(vec![
            Part::File("logo.png", png_bytes(400, 200)),
            Part::Text("format", "JPEG"),
            Part::Text("width", "200"),
            Part::Text("height", ""),
        ]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response.into_body()).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["filename"], "logo.png");
    assert_eq!(json["output_filename"], "logo.jpg");
    assert_eq!(json["original_size"], serde_json::json!([400, 200]));
    assert_eq!(json["output_dimensions"], serde_json::json!([200, 100]));
    assert_eq!(json["is_ico"], false);
    assert!(json["compression_ratio"].as_str().unwrap().ends_with('%'));
    assert_eq!(staged_files(&config), 0);

    let url = json["download_url"].as_str().unwrap().to_string();
    let session = json["session_id"].as_str().unwrap();
    assert_eq!(url, format!("/download/{}/logo.jpg", session));

    let response = app
        .oneshot(Request::get(url.as_str()).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"logo.jpg\""
    );

    let bytes = body_bytes(response.into_body()).await;
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (200, 100));
    assert!(!decoded.color().has_alpha());
}

#[tokio::test]
async fn test_multi_upload_returns_archive_of_successes() {
    let (_dir, _config, app) = create_test_app();

    let response = app
        .clone()
        .oneshot(upload_request(vec![
            Part::File("one.png", png_bytes(32, 32)),
            Part::File("broken.png", b"not an image".to_vec()),
            Part::File("two.png", png_bytes(64, 16)),
            Part::Text("format", "webp"),
        ]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response.into_body()).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["batch"], true);

    let results = json["results"].as_array().unwrap();
    let outcomes: Vec<(&str, bool)> = results
        .iter()
        .map(|r| (r["filename"].as_str().unwrap(), r["success"].as_bool().unwrap()))
        .collect();
    assert_eq!(
        outcomes,
        vec![("one.png", true), ("broken.png", false), ("two.png", true)]
    );
    assert_eq!(results[1]["stage"], "decode");
    assert!(!results[1]["error"].as_str().unwrap().is_empty());

    let zip_name = json["zip_filename"].as_str().unwrap();
    assert!(zip_name.starts_with("converted_images_") && zip_name.ends_with(".zip"));

    let url = json["download_url"].as_str().unwrap().to_string();
    let response = app
        .oneshot(Request::get(url.as_str()).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");

    let bytes = body_bytes(response.into_body()).await;
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(names, vec!["one.webp".to_string(), "two.webp".to_string()]);

    let mut entry = archive.by_name("two.webp").unwrap();
    let mut data = Vec::new();
    entry.read_to_end(&mut data).unwrap();
    let decoded = image::load_from_memory(&data).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (64, 16));
}

#[tokio::test]
async fn test_multi_size_icon_upload() {
    let (_dir, _config, app) = create_test_app();

    let response = app
        .oneshot(upload_request(vec![
            Part::File("favicon.png", png_bytes(512, 256)),
            Part::Text("format", "ICO"),
            Part::Text("ico_multi_size", "true"),
        ]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response.into_body()).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["is_ico"], true);
    assert_eq!(json["output_filename"], "favicon.ico");
    assert_eq!(
        json["icon"]["frames"],
        serde_json::json!([16, 32, 48, 64, 128, 256])
    );
    assert!(json.get("compression_ratio").is_none());
}

#[tokio::test]
async fn test_disallowed_extension_is_rejected() {
    let (_dir, config, app) = create_test_app();

    let response = app
        .oneshot(upload_request(vec![
            Part::File("ok.png", png_bytes(8, 8)),
            Part::File("notes.txt", b"hello".to_vec()),
            Part::Text("format", "PNG"),
        ]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response.into_body()).await;
    assert!(json["error"].as_str().unwrap().contains("notes.txt"));
    assert_eq!(staged_files(&config), 0);
}

#[tokio::test]
async fn test_unknown_format_is_rejected() {
    let (_dir, config, app) = create_test_app();

    let response = app
        .oneshot(upload_request(vec![
            Part::File("ok.png", png_bytes(8, 8)),
            Part::Text("format", "XCF"),
        ]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response.into_body()).await;
    assert!(json["error"].as_str().unwrap().contains("XCF"));
    assert_eq!(staged_files(&config), 0);
}

#[tokio::test]
async fn test_upload_without_files_is_rejected() {
    let (_dir, _config, app) = create_test_app();

    let response = app
        .oneshot(upload_request(vec![Part::Text("format", "PNG")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_dimension_is_rejected() {
    let (_dir, _config, app) = create_test_app();

    let response = app
        .oneshot(upload_request(vec![
            Part::File("ok.png", png_bytes(8, 8)),
            Part::Text("width", "6000"),
        ]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_download_missing_file_is_not_found() {
    let (_dir, _config, app) = create_test_app();

    let response = app
        .oneshot(
            Request::get("/download/nope/missing.png")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_download_rejects_traversal() {
    let (dir, _config, app) = create_test_app();
    std::fs::write(dir.path().join("secret.txt"), b"secret").unwrap();

    let response = app
        .oneshot(
            Request::get("/download/../secret.txt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
