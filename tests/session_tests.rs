//! Upload session tests against real files

mod common;

use bgremove_canvas::{ImageIOService, UploadSession};
use common::{write_jpeg, write_subject_png};
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_session_keeps_supported_files_in_pick_order() {
    let dir = TempDir::new().unwrap();
    let b = write_subject_png(dir.path(), "b.PNG", 10, 10);
    let a = write_jpeg(dir.path(), "a.jpeg", 10, 10);
    let notes = dir.path().join("notes.txt");
    std::fs::write(&notes, b"x").unwrap();

    let mut session = UploadSession::new();
    let rejected = session.add_files([&b, &notes, &a]);

    assert_eq!(session.files(), &[b.clone(), a.clone()]);
    assert_eq!(rejected.files, vec![notes]);
    assert_eq!(rejected.names(), "notes.txt");
}

#[test]
fn test_adding_the_same_file_twice_keeps_one() {
    let dir = TempDir::new().unwrap();
    let photo = write_jpeg(dir.path(), "photo.jpg", 10, 10);
    let dotted = dir.path().join(".").join("photo.jpg");

    let mut session = UploadSession::new();
    session.add_files([&photo]);
    session.add_files([&dotted, &photo]);

    assert_eq!(session.len(), 1);
}

#[test]
fn test_take_files_empties_the_session() {
    let dir = TempDir::new().unwrap();
    let files: Vec<PathBuf> = (0..3)
        .map(|i| write_jpeg(dir.path(), &format!("{i}.jpg"), 8, 8))
        .collect();

    let mut session = UploadSession::new();
    assert!(session.add_files(&files).is_empty());

    let taken = session.take_files();
    assert_eq!(taken, files);
    assert!(session.is_empty());
    assert!(taken.iter().all(|path| ImageIOService::load_image(path).is_ok()));

    session.add_files(&files[..1]);
    session.clear();
    assert!(session.is_empty());
}
