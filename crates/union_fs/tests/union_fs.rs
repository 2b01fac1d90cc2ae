use camino::Utf8PathBuf;
use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::sync::Arc;
use tempfile::TempDir;
use union_fs::{
    accept_all, AttributeViewKind, Error, FileSystem, LogicalPath, RootSource, UnionFileSystem,
};
use zip::write::SimpleFileOptions;

struct Fixture {
    _tmp: TempDir,
    dir1: Utf8PathBuf,
    dir2: Utf8PathBuf,
    zip: Utf8PathBuf,
}

fn write(base: &Utf8PathBuf, name: &str, content: &str) {
    let path = base.join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Two overlapping directories plus a zip with the same layout as `dir1`.
fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let base = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();

    let dir1 = base.join("dir1");
    write(&dir1, "masktest.txt", "dir1");
    write(&dir1, "masktest2.txt", "dir1");
    write(&dir1, "subdir1/masktestsd1.txt", "dir1");

    let dir2 = base.join("dir2");
    write(&dir2, "masktest.txt", "dir2");
    write(&dir2, "masktest3.txt", "dir2");

    let zip = base.join("dir1.zip");
    let mut writer = zip::ZipWriter::new(std::fs::File::create(&zip).unwrap());
    for (name, content) in [
        ("masktest.txt", "zip"),
        ("masktest2.txt", "zip"),
        ("subdir1/masktestsd1.txt", "zip"),
    ] {
        writer.start_file(name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap();

    Fixture {
        _tmp: tmp,
        dir1,
        dir2,
        zip,
    }
}

fn regular_files(fs: &dyn FileSystem) -> BTreeSet<String> {
    fs.walk(&fs.root())
        .unwrap()
        .into_iter()
        .filter(|p| fs.is_regular_file(p))
        .map(|p| p.relative_str())
        .collect()
}

#[test]
fn test_last_root_wins() {
    let fx = fixture();
    let fs = UnionFileSystem::new(accept_all(), &[fx.dir1.clone(), fx.dir2.clone()]).unwrap();

    assert_eq!(fs.base_paths(), vec![fx.dir2.as_path(), fx.dir1.as_path()]);

    let masktest = fs.get_path("masktest.txt");
    assert!(fs.exists(&masktest));
    assert_eq!(fs.read_to_string(&masktest).unwrap(), "dir2");

    // Only in the lower root.
    let sd = fs.root().resolve_str("subdir1/masktestsd1.txt");
    assert_eq!(fs.read_to_string(&sd).unwrap(), "dir1");

    // Every walked path exists.
    for path in fs.walk(&fs.root()).unwrap() {
        assert!(fs.exists(&path), "{path}");
    }
}

#[test]
fn test_masking_falls_back_to_lower_root() {
    let fx = fixture();
    let hidden = fx.dir2.to_string();
    let fs = UnionFileSystem::new(
        Arc::new(move |path: &str, root: &str| !(path == "masktest.txt" && root == hidden)),
        &[fx.dir1.clone(), fx.dir2.clone()],
    )
    .unwrap();

    assert_eq!(
        fs.read_to_string(&fs.get_path("masktest.txt")).unwrap(),
        "dir1"
    );
}

#[test]
fn test_path_filtering() {
    let fx = fixture();
    let fs = UnionFileSystem::new(
        Arc::new(|path: &str, _: &str| !path.starts_with("masktest2.txt")),
        &[fx.dir1.clone(), fx.dir2.clone()],
    )
    .unwrap();

    assert!(fs.exists(&fs.get_path("masktest.txt")));
    assert!(fs.exists(&fs.get_path("masktest3.txt")));
    assert!(!fs.exists(&fs.get_path("masktest2.txt")));

    let sd1 = fs.root().resolve_str("subdir1");
    let walked: Vec<LogicalPath> = fs.walk(&sd1).unwrap();
    assert_eq!(walked, vec![sd1.clone(), sd1.resolve_str("masktestsd1.txt")]);
}

#[test]
fn test_filtered_duplicate_archive() {
    let fx = fixture();

    let all = UnionFileSystem::new(accept_all(), &[fx.zip.clone()]).unwrap();
    assert_eq!(
        regular_files(&all),
        BTreeSet::from([
            "masktest.txt".to_string(),
            "masktest2.txt".to_string(),
            "subdir1/masktestsd1.txt".to_string(),
        ])
    );

    let some = UnionFileSystem::new(
        Arc::new(|path: &str, _: &str| path.ends_with('/') || path == "masktest.txt"),
        &[fx.zip.clone()],
    )
    .unwrap();
    assert_eq!(
        regular_files(&some),
        BTreeSet::from(["masktest.txt".to_string()])
    );

    let listed: Vec<String> = some
        .list(&some.root())
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(listed, ["masktest.txt", "subdir1"]);

    let location = some.locate(&some.get_path("masktest.txt")).unwrap().unwrap();
    assert_eq!(location.to_string(), format!("{}!/masktest.txt", fx.zip));
}

#[test]
fn test_nested_union() {
    let fx = fixture();
    let inner = UnionFileSystem::new(
        Arc::new(|path: &str, _: &str| path.ends_with('/') || path == "masktest.txt"),
        &[fx.zip.clone()],
    )
    .unwrap();
    let outer =
        UnionFileSystem::from_roots(accept_all(), vec![RootSource::Union(Arc::new(inner))]).unwrap();

    assert_eq!(
        regular_files(&outer),
        BTreeSet::from(["masktest.txt".to_string()])
    );

    let mut data = String::new();
    outer
        .open(&outer.get_path("masktest.txt"))
        .unwrap()
        .read_to_string(&mut data)
        .unwrap();
    assert_eq!(data, "zip");

    assert!(!outer.exists(&outer.get_path("masktest2.txt")));
    let location = outer.locate(&outer.get_path("masktest.txt")).unwrap().unwrap();
    assert_eq!(location.root, fx.zip);
    assert!(location.archive);
}

#[test]
fn test_nested_union_over_directories() {
    let fx = fixture();
    let inner = UnionFileSystem::new(accept_all(), &[fx.dir1.clone()]).unwrap();
    let outer = UnionFileSystem::from_roots(
        accept_all(),
        vec![
            RootSource::Union(Arc::new(inner)),
            RootSource::open(&fx.dir2).unwrap(),
        ],
    )
    .unwrap();

    assert_eq!(
        outer.read_to_string(&outer.get_path("masktest.txt")).unwrap(),
        "dir2"
    );
    assert_eq!(
        outer
            .read_to_string(&outer.get_path("subdir1/masktestsd1.txt"))
            .unwrap(),
        "dir1"
    );
}

#[test]
fn test_file_attributes() {
    let fx = fixture();
    let fs = UnionFileSystem::new(accept_all(), &[fx.dir1.clone(), fx.dir2.clone()]).unwrap();
    let other = UnionFileSystem::new(accept_all(), &[fx.dir1.clone()]).unwrap();

    // Foreign path and unsupported kinds yield no view.
    assert!(fs
        .get_attribute_view(&other.get_path("subdir1"), AttributeViewKind::Basic)
        .is_none());
    let path = fs.get_path("masktest.txt");
    assert!(fs
        .get_attribute_view(&path, AttributeViewKind::Posix)
        .is_none());

    // A view over a missing path is created fine and fails on read.
    let missing = fs.get_path("nonexistent.txt");
    let view = fs
        .get_attribute_view(&missing, AttributeViewKind::Basic)
        .unwrap();
    assert!(matches!(view.read_attributes(), Err(Error::NotFound(_))));

    // The eager read fails immediately.
    assert!(matches!(fs.read_attributes(&missing), Err(Error::NotFound(_))));

    let view = fs.get_attribute_view(&path, AttributeViewKind::Basic).unwrap();
    let attrs = view.read_attributes().unwrap();
    assert!(attrs.is_regular_file());
    assert_eq!(attrs.size, 4);
    assert!(attrs.modified.is_some());

    let dir = fs.read_attributes(&fs.get_path("subdir1")).unwrap();
    assert!(dir.is_directory());
}

#[test]
fn test_listing_merges_roots() {
    let fx = fixture();
    let fs = UnionFileSystem::new(accept_all(), &[fx.dir1.clone(), fx.dir2.clone()]).unwrap();

    let names: Vec<String> = fs
        .list(&fs.root())
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(
        names,
        ["masktest.txt", "masktest2.txt", "masktest3.txt", "subdir1"]
    );

    assert!(matches!(
        fs.list(&fs.get_path("masktest.txt")),
        Err(Error::NotADirectory(_))
    ));
    assert!(matches!(
        fs.list(&fs.get_path("nowhere")),
        Err(Error::NotFound(_))
    ));
}
