//! Snapshot save, load and validation.

use std::path::Path;

use super::{memory_session, ramp_cube, write_cube};
use crate::annotation::Derived;
use crate::cache::Mode;
use crate::data::{Pixel, WavelengthRange};
use crate::error::{Error, FormatError};
use crate::preprocess::PreprocessingFlags;
use crate::session::{InputMode, SessionState, Snapshot};

const EMPTY: &str = r#"{
    "sources": [],
    "mode": "reflectance",
    "preprocessing": {"denoise": false, "smoothing": false, "snv": false}
}"#;

fn snapshot_with(source_path: &Path, body: &str) -> String {
    format!(
        r#"{{
            "version": "1.0",
            "sources": [{{"id": "src1", "path": {}}}],
            "mode": "absorbance",
            "preprocessing": {{"denoise": false, "smoothing": false, "snv": false}},
            {}
        }}"#,
        serde_json::to_string(source_path).unwrap(),
        body
    )
}

#[test]
fn test_round_trip_preserves_state_and_spectra() {
    let dir = tempfile::tempdir().unwrap();
    let cube = write_cube(dir.path(), "scene.npy", &ramp_cube());

    let mut session = SessionState::new();
    let src = session.open_source(&cube).unwrap();
    let point = session.add_point(&src, Pixel::new(1, 2), "leaf").unwrap();
    let polygon = session
        .add_polygon(
            &src,
            vec![Pixel::new(0, 0), Pixel::new(0, 3), Pixel::new(3, 3)],
            "",
        )
        .unwrap();
    session.set_visibility(&polygon, false).unwrap();
    session.set_mode(Mode::Absorbance);
    session.set_flags(PreprocessingFlags {
        denoise: false,
        smoothing: false,
        snv: true,
    });
    session.set_wavelength_range(WavelengthRange::new(405.0, 415.0).unwrap());

    let path = dir.path().join("saved").join("session.json");
    session.save_snapshot(&path).unwrap();

    let mut loaded = SessionState::new();
    let report = loaded.load_snapshot(&path).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.sources_loaded, 1);
    assert_eq!((report.points, report.polygons), (1, 1));
    assert_eq!(loaded.to_snapshot(), session.to_snapshot());

    for id in [&point, &polygon] {
        let original = &session.annotations().get(id).unwrap().derived;
        let restored = &loaded.annotations().get(id).unwrap().derived;
        assert!(original.spectrum().is_some());
        assert_eq!(restored, original);
    }

    // New ids continue after the restored ones.
    let next = loaded.add_point(&src, Pixel::new(4, 4), "").unwrap();
    assert_eq!(next.as_str(), "pt0003");
}

#[test]
fn test_reload_keeps_creation_order() {
    let dir = tempfile::tempdir().unwrap();
    let cube = write_cube(dir.path(), "scene.npy", &ramp_cube());

    let mut session = SessionState::new();
    let src = session.open_source(&cube).unwrap();
    session.add_point(&src, Pixel::new(0, 0), "first").unwrap();
    session
        .add_polygon(
            &src,
            vec![Pixel::new(1, 1), Pixel::new(1, 4), Pixel::new(4, 4)],
            "second",
        )
        .unwrap();
    session.add_point(&src, Pixel::new(2, 2), "third").unwrap();

    let path = dir.path().join("session.json");
    session.save_snapshot(&path).unwrap();
    let mut loaded = SessionState::new();
    loaded.load_snapshot(&path).unwrap();

    let order = |s: &SessionState| -> Vec<String> {
        s.annotations().iter().map(|a| a.id.to_string()).collect()
    };
    assert_eq!(order(&loaded), vec!["pt0001", "pg0002", "pt0003"]);
    assert_eq!(order(&loaded), order(&session));
    assert_eq!(loaded.remove_last().unwrap().id.as_str(), "pt0003");
}

#[test]
fn test_largest_id_counter_loads() {
    let dir = tempfile::tempdir().unwrap();
    let cube = write_cube(dir.path(), "scene.npy", &ramp_cube());
    let json = snapshot_with(
        &cube,
        r#""points": [{"id": "pt18446744073709551615", "source_id": "src1", "pixel": [1, 1], "color": [31, 119, 180]}]"#,
    );
    let snapshot = Snapshot::from_json(&json).unwrap();
    let (mut session, report) = SessionState::from_snapshot(snapshot, dir.path()).unwrap();
    assert_eq!(report.points, 1);

    let src = "src1".into();
    let a = session.add_point(&src, Pixel::new(2, 2), "").unwrap();
    let b = session.add_point(&src, Pixel::new(3, 3), "").unwrap();
    assert_ne!(a.as_str(), "pt18446744073709551615");
    assert_ne!(a, b);
    assert_eq!(session.annotations().len(), 3);
}

#[test]
fn test_empty_snapshot() {
    let snapshot = Snapshot::from_json(EMPTY).unwrap();
    assert_eq!(snapshot.version, "1.0");
    assert_eq!(snapshot.wavelength_range, None);

    let dir = tempfile::tempdir().unwrap();
    let (session, report) = SessionState::from_snapshot(snapshot, dir.path()).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.sources_loaded, 0);
    assert!(session.sources().is_empty());
    assert!(session.annotations().is_empty());
    assert_eq!(session.mode(), Mode::Reflectance);
}

#[test]
fn test_missing_source_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let json = snapshot_with(
        Path::new("/no/such/dir/gone.npy"),
        r#""points": [{"id": "pt0001", "source_id": "src1", "pixel": [0, 0], "color": [31, 119, 180]}]"#,
    );
    let snapshot = Snapshot::from_json(&json).unwrap();
    let (session, report) = SessionState::from_snapshot(snapshot, dir.path()).unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.unresolved.len(), 1);
    assert_eq!(report.unresolved[0].id.as_str(), "src1");
    assert_eq!(report.points, 1);

    let point = session.annotations().get(&"pt0001".into()).unwrap();
    assert_eq!(point.derived, Derived::Unresolved);
    assert!(matches!(
        session.require_source(&"src1".into()),
        Err(Error::UnresolvedSource(_))
    ));

    // The locator survives a save.
    let saved = session.to_snapshot();
    assert_eq!(saved.sources.len(), 1);
    assert_eq!(saved.sources[0].path, Path::new("/no/such/dir/gone.npy"));
}

#[test]
fn test_source_found_next_to_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    write_cube(dir.path(), "scene.npy", &ramp_cube());
    let json = snapshot_with(
        Path::new("/elsewhere/data/scene.npy"),
        r#""points": [{"id": "pt0001", "source_id": "src1", "pixel": [2, 2], "color": [31, 119, 180]}]"#,
    );
    let path = dir.path().join("session.json");
    std::fs::write(&path, json).unwrap();

    let mut session = SessionState::new();
    let report = session.load_snapshot(&path).unwrap();
    assert!(report.is_complete());
    assert_eq!(session.mode(), Mode::Absorbance);
    let point = session.annotations().get(&"pt0001".into()).unwrap();
    assert!(point.derived.spectrum().is_some());
}

#[test]
fn test_validation_errors() {
    let path = Path::new("/data/scene.npy");

    let unknown = snapshot_with(
        path,
        r#""points": [{"id": "pt0001", "source_id": "src9", "pixel": [0, 0], "color": [1, 2, 3]}]"#,
    );
    assert!(matches!(
        Snapshot::from_json(&unknown),
        Err(FormatError::UnknownSource { .. })
    ));

    let duplicate = snapshot_with(
        path,
        r#""points": [
            {"id": "pt0001", "source_id": "src1", "pixel": [0, 0], "color": [1, 2, 3]},
            {"id": "pt0001", "source_id": "src1", "pixel": [1, 1], "color": [4, 5, 6]}
        ]"#,
    );
    assert!(matches!(
        Snapshot::from_json(&duplicate),
        Err(FormatError::DuplicateId(id)) if id == "pt0001"
    ));

    let degenerate = snapshot_with(
        path,
        r#""polygons": [{"id": "pg0001", "source_id": "src1", "vertices": [[0, 0], [1, 1]], "color": [1, 2, 3]}]"#,
    );
    match Snapshot::from_json(&degenerate) {
        Err(FormatError::InvalidValue { field, .. }) => assert_eq!(field, "polygons[0].vertices"),
        other => panic!("unexpected {:?}", other),
    }

    let inverted = snapshot_with(path, r#""wavelength_range": [700.0, 400.0]"#);
    assert!(matches!(Snapshot::from_json(&inverted), Err(FormatError::Json(_))));

    let missing_mode = r#"{"sources": [], "preprocessing": {"denoise": false, "smoothing": false, "snv": false}}"#;
    assert!(matches!(Snapshot::from_json(missing_mode), Err(FormatError::Json(_))));
}

#[test]
fn test_version_check() {
    let newer = EMPTY.replacen('{', r#"{"version": "2.0","#, 1);
    assert!(matches!(
        Snapshot::from_json(&newer),
        Err(FormatError::VersionMismatch { found, .. }) if found == "2.0"
    ));

    let minor = EMPTY.replacen('{', r#"{"version": "1.3","#, 1);
    assert!(Snapshot::from_json(&minor).is_ok());
}

#[test]
fn test_failed_restore_leaves_session_untouched() {
    let (mut session, src) = memory_session(ramp_cube());
    session.add_point(&src, Pixel::new(0, 0), "keep").unwrap();

    let mut bad = Snapshot::from_json(EMPTY).unwrap();
    bad.version = "9.0".to_string();
    assert!(session.restore(bad, Path::new(".")).is_err());
    assert_eq!(session.annotations().len(), 1);
    assert_eq!(session.sources().len(), 1);
}

#[test]
fn test_open_polygon_not_saved() {
    let (mut session, src) = memory_session(ramp_cube());
    session.add_point(&src, Pixel::new(0, 0), "").unwrap();
    session.set_input_mode(InputMode::Polygon);
    session.click(&src, Pixel::new(1, 1)).unwrap();
    session.click(&src, Pixel::new(1, 4)).unwrap();

    let snapshot = session.to_snapshot();
    assert_eq!(snapshot.points.len(), 1);
    assert!(snapshot.polygons.is_empty());
    assert_eq!(snapshot.preprocessing.params, Some(*session.preprocessing_config()));
}
