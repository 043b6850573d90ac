//! Finder behavior over a real directory tree

mod common;

use catalog_ingest::finder::{Finder, FinderError};
use catalog_ingest::models::{DeterminerValue, Determiners};
use common::{FULL_SIZE, file_name, forced_tree, write_file};
use tempfile::tempdir;

#[test]
fn test_some_file_is_first_in_sorted_order() {
    let dir = tempdir().unwrap();
    forced_tree(dir.path());
    let finder = Finder::forced_source(dir.path());

    let (path, determiners) = finder.some_file().unwrap().unwrap();
    assert_eq!(path.file_name().unwrap(), file_name(210472, 'g', "01", "00").as_str());
    assert_eq!(
        determiners,
        Determiners::new()
            .with("visit", 210472)
            .with("raft", "01")
            .with("sensor", "00")
    );
}

#[test]
fn test_some_file_on_empty_root() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("00210472-g").join("R01")).unwrap();
    let finder = Finder::forced_source(dir.path());
    assert!(finder.some_file().unwrap().is_none());
    assert!(finder.units().unwrap().contains(&DeterminerValue::Int(210472)));
}

#[test]
fn test_files_for_unit() {
    let dir = tempdir().unwrap();
    forced_tree(dir.path());
    let finder = Finder::forced_source(dir.path());
    let unit = Determiners::new().with("visit", 210472);

    let all = finder.files_for_unit(&unit, false).unwrap();
    assert_eq!(all.len(), 4);
    let loadable = finder.files_for_unit(&unit, true).unwrap();
    assert_eq!(loadable.len(), 3);
    assert!(loadable.windows(2).all(|w| w[0] < w[1]));

    let raft = unit.clone().with("raft", "22");
    let names: Vec<String> = finder
        .files_for_unit(&raft, false)
        .unwrap()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec![file_name(210472, 'g', "22", "20"), file_name(210472, 'g', "22", "21")]
    );

    let nothing = Determiners::new().with("visit", 1);
    assert!(finder.files_for_unit(&nothing, false).unwrap().is_empty());

    let bad = Determiners::new().with("raft", "01");
    assert!(matches!(
        finder.files_for_unit(&bad, false),
        Err(FinderError::BadKey { .. })
    ));
}

#[test]
fn test_units_are_numeric_order() {
    let dir = tempdir().unwrap();
    forced_tree(dir.path());
    write_file(dir.path(), 9, 'u', "00", "00", FULL_SIZE);
    let finder = Finder::forced_source(dir.path());
    assert_eq!(
        finder.units().unwrap(),
        vec![
            DeterminerValue::Int(9),
            DeterminerValue::Int(210472),
            DeterminerValue::Int(210480)
        ]
    );
}

#[test]
fn test_path_for() {
    let dir = tempdir().unwrap();
    forced_tree(dir.path());
    let finder = Finder::forced_source(dir.path());

    assert_eq!(
        finder.path_for(&Determiners::new()).unwrap(),
        Some(dir.path().to_path_buf())
    );
    let unit = Determiners::new().with("visit", 210480);
    assert_eq!(
        finder.path_for(&unit).unwrap(),
        Some(dir.path().join("00210480-r"))
    );
    let raft = unit.clone().with("raft", "10");
    assert_eq!(
        finder.path_for(&raft).unwrap(),
        Some(dir.path().join("00210480-r").join("R10"))
    );
    let file = raft.clone().with("sensor", "11");
    assert_eq!(
        finder.path_for(&file).unwrap(),
        Some(
            dir.path()
                .join("00210480-r")
                .join("R10")
                .join(file_name(210480, 'r', "10", "11"))
        )
    );
    let absent = raft.with("sensor", "22");
    assert_eq!(finder.path_for(&absent).unwrap(), None);
}

#[test]
fn test_determiners_of() {
    let dir = tempdir().unwrap();
    let finder = Finder::forced_source(dir.path());
    let path = dir
        .path()
        .join("anywhere")
        .join(file_name(210472, 'g', "04", "12"));
    let determiners = finder.determiners_of(&path).unwrap();
    assert_eq!(determiners.get("sensor"), Some(&DeterminerValue::Text("12".into())));

    let stray = dir.path().join("notes.txt");
    assert!(matches!(
        finder.determiners_of(&stray),
        Err(FinderError::UnrecognizedPath(p)) if p == stray
    ));
}

#[test]
fn test_listing_is_cached() {
    let dir = tempdir().unwrap();
    forced_tree(dir.path());
    let finder = Finder::forced_source(dir.path());
    let unit = Determiners::new().with("visit", 210480);
    assert_eq!(finder.files_for_unit(&unit, true).unwrap().len(), 1);

    write_file(dir.path(), 210480, 'r', "10", "12", FULL_SIZE);
    assert_eq!(finder.files_for_unit(&unit, true).unwrap().len(), 1);
    let fresh = Finder::forced_source(dir.path());
    assert_eq!(fresh.files_for_unit(&unit, true).unwrap().len(), 2);
}

#[test]
fn test_missing_root() {
    let dir = tempdir().unwrap();
    let finder = Finder::forced_source(dir.path().join("gone"));
    assert!(matches!(finder.units(), Err(FinderError::Io { .. })));
}

#[cfg(unix)]
#[test]
fn test_dangling_link_is_skipped() {
    let dir = tempdir().unwrap();
    forced_tree(dir.path());
    let r01 = dir.path().join("00210472-g").join("R01");
    std::os::unix::fs::symlink(dir.path().join("gone"), r01.join("stale_link")).unwrap();
    // A link that would match the grammar is skipped the same way
    std::os::unix::fs::symlink(
        dir.path().join("gone.fits"),
        r01.join(file_name(210472, 'g', "01", "02")),
    )
    .unwrap();
    let finder = Finder::forced_source(dir.path());

    let (path, _) = finder.some_file().unwrap().unwrap();
    assert_eq!(path.file_name().unwrap(), file_name(210472, 'g', "01", "00").as_str());
    let unit = Determiners::new().with("visit", 210472);
    assert_eq!(finder.files_for_unit(&unit, false).unwrap().len(), 4);
}
