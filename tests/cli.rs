//! Exit codes and messages of the `slide2thesis` binary.

#![cfg(feature = "cli")]

use std::process::{Command, Output};

fn slide2thesis(args: &[&str], cwd: &std::path::Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_slide2thesis"))
        .args(args)
        .current_dir(cwd)
        .env_remove("GEMINI_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn list_styles_needs_no_pdf() {
    let tmp = tempfile::tempdir().unwrap();
    let out = slide2thesis(&["--list-styles"], tmp.path());
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("thesis"), "{stdout}");
    assert!(stdout.contains("nature"), "{stdout}");
}

#[test]
fn missing_pdf_exits_non_zero() {
    let tmp = tempfile::tempdir().unwrap();
    let out = slide2thesis(&["absent.pdf", "--quiet"], tmp.path());
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("PDF file not found"), "{stderr}");
}

#[test]
fn citations_without_chapters_names_the_missing_artifact() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("talk.pdf"), b"%PDF-1.7").unwrap();
    let out = slide2thesis(
        &["talk.pdf", "--add-citations", "--output-dir", "work", "--quiet"],
        tmp.path(),
    );
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("step 'citations' failed"), "{stderr}");
    assert!(stderr.contains("introduction_chapter.md"), "{stderr}");
    assert!(!tmp.path().join("work/references.bib").exists());
}
