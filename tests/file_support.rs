//! Integration tests for multi-format file ingestion through `AppContext`
//! (§4.1, §6 `save_file`): PDF and DOCX extraction, the size policy, and
//! the *failed* status path for corrupt input.

use knowbase::app::AppContext;
use knowbase::config::Config;
use knowbase::models::{ItemStatus, MimeFamily};

fn test_config(data_root: &std::path::Path) -> Config {
    let toml_text = format!(
        "data_root = \"{}\"\n[embedding]\nprovider = \"disabled\"\n",
        data_root.display()
    );
    let mut f = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut f, toml_text.as_bytes()).unwrap();
    let mut config = knowbase::config::load_config(f.path()).unwrap();
    // A disabled embedder still needs a fixed dimension for the VectorIndex
    // to validate against; these tests only exercise extraction, so any
    // embedding failure after that point is expected and checked for.
    config.embedding.dims = Some(3);
    config
}

/// A minimal but structurally valid single-page PDF containing the text
/// "spec test phrase", built with correct `xref` byte offsets so
/// `pdf-extract` can parse it.
fn minimal_pdf_with_phrase() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        b"4 0 obj << /Length 44 >> stream\nBT /F1 12 Tf 100 700 Td (spec test phrase) Tj ET\nendstream endobj\n",
    );
    let o5 = out.len();
    out.extend_from_slice(b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n");
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o1).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o2).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o3).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o4).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o5).as_bytes());
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// A minimal docx (a ZIP containing `word/document.xml`) with a single
/// paragraph holding `phrase`.
fn minimal_docx_with_text(phrase: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default()).unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

#[tokio::test]
async fn docx_file_is_extracted_and_marked_ready() {
    let dir = tempfile::tempdir().unwrap();
    let app = AppContext::new(test_config(dir.path())).unwrap();
    let space = app.create_space("user-1", "Docs", None).await.unwrap();

    let item = app
        .save_file(
            "user-1",
            &space.space_id,
            &minimal_docx_with_text("office test phrase"),
            MimeFamily::Docx,
            "notes.docx",
            None,
        )
        .await
        .unwrap();

    assert_eq!(item.status, ItemStatus::Ready);
    assert_eq!(item.extracted_text.as_deref(), Some("office test phrase"));
    assert!(item.vector_ref.is_some());
}

#[tokio::test]
async fn pdf_file_is_extracted_and_marked_ready() {
    let dir = tempfile::tempdir().unwrap();
    let app = AppContext::new(test_config(dir.path())).unwrap();
    let space = app.create_space("user-1", "Docs", None).await.unwrap();

    let item = app
        .save_file(
            "user-1",
            &space.space_id,
            &minimal_pdf_with_phrase(),
            MimeFamily::Pdf,
            "spec.pdf",
            None,
        )
        .await
        .unwrap();

    assert_eq!(item.status, ItemStatus::Ready);
    assert!(item.extracted_text.as_deref().unwrap().contains("spec test phrase"));
}

#[tokio::test]
async fn corrupt_pdf_marks_item_failed_with_no_vector_entry() {
    let dir = tempfile::tempdir().unwrap();
    let app = AppContext::new(test_config(dir.path())).unwrap();
    let space = app.create_space("user-1", "Docs", None).await.unwrap();

    let err = app
        .save_file("user-1", &space.space_id, b"not a valid pdf", MimeFamily::Pdf, "bad.pdf", None)
        .await
        .unwrap_err();
    assert!(matches!(err, knowbase::errors::CoreError::Corrupt(_)));

    let items = app.list_items("user-1", &space.space_id, 10, 0).await.unwrap();
    assert_eq!(items.len(), 1);
    assert!(matches!(items[0].status, ItemStatus::Failed { .. }));
    assert!(items[0].vector_ref.is_none());
}

#[tokio::test]
async fn invalid_docx_zip_marks_item_failed() {
    let dir = tempfile::tempdir().unwrap();
    let app = AppContext::new(test_config(dir.path())).unwrap();
    let space = app.create_space("user-1", "Docs", None).await.unwrap();

    let err = app
        .save_file("user-1", &space.space_id, b"not a zip archive", MimeFamily::Docx, "bad.docx", None)
        .await
        .unwrap_err();
    assert!(matches!(err, knowbase::errors::CoreError::Corrupt(_)));
}

#[tokio::test]
async fn oversized_file_is_rejected_with_no_item_and_no_bytes_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let app = AppContext::new(test_config(dir.path())).unwrap();
    let space = app.create_space("user-1", "Docs", None).await.unwrap();

    let big = vec![0u8; (knowbase::extract::MAX_INPUT_BYTES + 1) as usize];
    let err = app
        .save_file("user-1", &space.space_id, &big, MimeFamily::Plain, "huge.txt", None)
        .await
        .unwrap_err();
    assert!(matches!(err, knowbase::errors::CoreError::TooLarge));

    let items = app.list_items("user-1", &space.space_id, 10, 0).await.unwrap();
    assert!(items.is_empty());

    let files_root = dir.path().join("user-1").join("files");
    assert!(!files_root.exists() || files_root.read_dir().unwrap().next().is_none());
}

#[tokio::test]
async fn plain_text_file_round_trips_through_search() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.embedding.provider = "disabled".to_string();
    let app = AppContext::new(config).unwrap();
    let space = app.create_space("user-1", "Docs", None).await.unwrap();

    // With embeddings disabled the ingestion fails past extraction; the
    // item is removed (transient failure, §7 kinds 4-5) rather than marked
    // failed, since the input itself was fine.
    let err = app
        .save_file("user-1", &space.space_id, b"hello from a plain file", MimeFamily::Plain, "hello.txt", None)
        .await
        .unwrap_err();
    assert!(matches!(err, knowbase::errors::CoreError::BackendUnavailable(_)));

    let items = app.list_items("user-1", &space.space_id, 10, 0).await.unwrap();
    assert!(items.is_empty());
}
