//! 目录扫描、标题识别与已有目录导入。

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use flate2::read::GzDecoder;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{info, warn};

use super::matcher::{extract_title_from_filename, match_files_to_volumes};
use super::models::{DownloadedVolume, LibraryEntry, ScannedFile};
use super::store::{LibraryStore, refresh_entry_from_detail};
use crate::base_system::errors::{KmoeError, Result};
use crate::network_parser::models::ComicDetail;

const BOOK_EXTENSIONS: [&str; 2] = ["epub", "mobi"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

fn re_hex_id() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"^[0-9a-fA-F]+$").expect("compile RE_HEX_ID"))
}

fn archive_kind(name: &str) -> Option<ArchiveKind> {
    let lower = name.to_lowercase();
    if lower.ends_with(".zip") {
        Some(ArchiveKind::Zip)
    } else if lower.ends_with(".tar") {
        Some(ArchiveKind::Tar)
    } else if lower.ends_with(".tgz") || lower.ends_with(".tar.gz") {
        Some(ArchiveKind::TarGz)
    } else {
        None
    }
}

fn is_book_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| BOOK_EXTENSIONS.iter().any(|b| ext.eq_ignore_ascii_case(b)))
}

fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// 列出压缩包内的 epub/mobi（不解压）。读取失败时记录警告并返回空列表。
pub fn list_archive_contents(archive: &Path) -> Vec<ScannedFile> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let Some(kind) = archive_kind(&name) else {
        return Vec::new();
    };
    let listed = match kind {
        ArchiveKind::Zip => list_zip(archive),
        ArchiveKind::Tar => File::open(archive).and_then(|f| list_tar(f, archive)),
        ArchiveKind::TarGz => File::open(archive).and_then(|f| list_tar(GzDecoder::new(f), archive)),
    };
    match listed {
        Ok(files) => files,
        Err(err) => {
            warn!(target: "library", path = %archive.display(), "读取压缩包失败: {err}");
            Vec::new()
        }
    }
}

fn list_zip(archive: &Path) -> std::io::Result<Vec<ScannedFile>> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
    let mut out = Vec::new();
    for i in 0..zip.len() {
        let entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        // 很多工具写入 UTF-8 文件名却不设置 UTF-8 标志位，优先按 UTF-8 解码原始字节
        let full = match std::str::from_utf8(entry.name_raw()) {
            Ok(s) => s.to_string(),
            Err(_) => entry.name().to_string(),
        };
        let file_name = base_name(&full);
        if is_book_name(file_name) {
            out.push(ScannedFile::in_archive(file_name, entry.size(), archive.to_path_buf()));
        }
    }
    Ok(out)
}

fn list_tar<R: Read>(reader: R, archive: &Path) -> std::io::Result<Vec<ScannedFile>> {
    let mut tar = tar::Archive::new(reader);
    let mut out = Vec::new();
    for entry in tar.entries()? {
        let entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?;
        let full = path.to_string_lossy();
        let file_name = base_name(&full);
        if is_book_name(file_name) {
            out.push(ScannedFile::in_archive(file_name, entry.size(), archive.to_path_buf()));
        }
    }
    Ok(out)
}

/// 目录下的书籍文件（含压缩包内容），按文件名排序，不递归。
pub fn scan_book_files(dir: &Path) -> Vec<ScannedFile> {
    let mut paths: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(rd) => rd.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(err) => {
            warn!(target: "library", path = %dir.display(), "读取目录失败: {err}");
            return Vec::new();
        }
    };
    paths.sort();

    let mut files = Vec::new();
    for path in paths {
        let Ok(meta) = fs::metadata(&path) else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if is_book_name(&name) {
            files.push(ScannedFile::loose(&name, meta.len(), path));
        } else if archive_kind(&name).is_some() {
            files.extend(list_archive_contents(&path));
        }
    }
    files
}

/// 从目录名或其中的文件名推断漫画标题。
///
/// 依次尝试：`{标题}_{十六进制ID}` 目录名、`[Kmoe]`/`[Mox]` 前缀目录名、
/// 散文件的 `[Kmoe][标题]` 命名、压缩包内文件的同样命名；
/// 目录里有书籍文件时退回目录名本身。
pub fn detect_title_from_directory(dir: &Path) -> Option<String> {
    let dir_name = dir.file_name()?.to_string_lossy().into_owned();

    if let Some((title, id)) = dir_name.rsplit_once('_') {
        if !title.is_empty() && re_hex_id().is_match(id) {
            return Some(title.to_string());
        }
    }

    for prefix in ["[Kmoe]", "[Mox]"] {
        if let Some(rest) = dir_name.strip_prefix(prefix) {
            if !rest.is_empty() {
                return Some(rest.to_string());
            }
        }
    }

    let loose_names: Vec<String> = fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    if let Some((title, _)) = loose_names.iter().find_map(|n| extract_title_from_filename(n)) {
        return Some(title);
    }

    let scanned = scan_book_files(dir);
    if let Some((title, _)) = scanned
        .iter()
        .find_map(|f| extract_title_from_filename(&f.name))
    {
        return Some(title);
    }

    (!scanned.is_empty()).then_some(dir_name)
}

fn format_of(name: &str) -> &'static str {
    let is_mobi = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mobi"));
    if is_mobi { "mobi" } else { "epub" }
}

fn modified_at(path: &Path) -> OffsetDateTime {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(OffsetDateTime::from)
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// 把已有目录登记为书库条目。
///
/// 扫描并匹配文件，写入目录内的 `library.json`，目标名不存在时将目录改为规范名，
/// 最后更新根索引。返回条目与未匹配的文件。
pub fn import_directory(
    store: &LibraryStore,
    dir: &Path,
    comic_id: &str,
    detail: &ComicDetail,
) -> Result<(LibraryEntry, Vec<ScannedFile>)> {
    let files = scan_book_files(dir);
    let matches = match_files_to_volumes(&files, &detail.volumes);

    let mut entry = LibraryEntry::new(detail.meta.clone(), comic_id);
    entry.downloaded_volumes = matches
        .matched
        .iter()
        .map(|(file, volume)| DownloadedVolume {
            vol_id: volume.vol_id.clone(),
            title: volume.title.clone(),
            format: format_of(&file.name).to_string(),
            filename: file.record_name(),
            downloaded_at: modified_at(&file.disk_path),
            size_bytes: file.size,
        })
        .collect();
    let entry = refresh_entry_from_detail(&entry, detail);

    store.write_entry_in(dir, &entry)?;

    let canonical = store.comic_dir(comic_id, &entry.title);
    if dir != canonical && !canonical.exists() {
        fs::rename(dir, &canonical).map_err(|e| KmoeError::io(dir, e))?;
        info!(
            target: "library",
            old = %dir.display(),
            new = %canonical.display(),
            "目录已重命名"
        );
    }

    store.update_root_index();
    Ok((entry, matches.unmatched))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network_parser::models::{ComicMeta, Volume};
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;

    fn write_zip(path: &Path, members: &[(&str, &str)]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        zip.add_directory("inner/", FileOptions::default()).unwrap();
        for (name, data) in members {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(data.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn append_tar<W: Write>(builder: &mut tar::Builder<W>, name: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data).unwrap();
    }

    #[test]
    fn zip_members_are_listed_by_basename() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pack.ZIP");
        write_zip(
            &path,
            &[
                ("inner/[Kmoe][棋魂]卷 01.epub", "aaaa"),
                ("inner/readme.txt", "x"),
                ("卷 02.MOBI", "bb"),
            ],
        );
        let files = list_archive_contents(&path);
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["[Kmoe][棋魂]卷 01.epub", "卷 02.MOBI"]);
        assert_eq!(files[0].size, 4);
        assert_eq!(files[0].archive_path.as_deref(), Some(path.as_path()));
        assert_eq!(files[0].record_name(), "pack.ZIP/[Kmoe][棋魂]卷 01.epub");
    }

    #[test]
    fn tar_and_tgz_members() {
        let dir = TempDir::new().unwrap();

        let tar_path = dir.path().join("a.tar");
        let mut builder = tar::Builder::new(File::create(&tar_path).unwrap());
        append_tar(&mut builder, "x/卷 01.epub", b"123");
        append_tar(&mut builder, "x/cover.jpg", b"1");
        builder.finish().unwrap();

        let tgz_path = dir.path().join("b.tar.gz");
        let gz = GzEncoder::new(File::create(&tgz_path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(gz);
        append_tar(&mut builder, "卷 02.mobi", b"12345");
        builder.into_inner().unwrap().finish().unwrap();

        let tar_files = list_archive_contents(&tar_path);
        assert_eq!(tar_files.len(), 1);
        assert_eq!(tar_files[0].name, "卷 01.epub");
        assert_eq!(tar_files[0].size, 3);

        let tgz_files = list_archive_contents(&tgz_path);
        assert_eq!(tgz_files.len(), 1);
        assert_eq!(tgz_files[0].name, "卷 02.mobi");
    }

    #[test]
    fn broken_archives_yield_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.zip");
        fs::write(&path, b"definitely not a zip").unwrap();
        assert!(list_archive_contents(&path).is_empty());
    }

    #[test]
    fn scan_is_sorted_and_not_recursive() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.epub"), b"b").unwrap();
        fs::write(dir.path().join("a.mobi"), b"a").unwrap();
        fs::write(dir.path().join("notes.txt"), b"n").unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("c.epub"), b"c").unwrap();
        write_zip(&dir.path().join("c.zip"), &[("d.epub", "dd")]);

        let names: Vec<_> = scan_book_files(dir.path())
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["a.mobi", "b.epub", "d.epub"]);
    }

    #[test]
    fn title_detection_order() {
        let root = TempDir::new().unwrap();

        let tracked = root.path().join("棋魂_425daf");
        fs::create_dir_all(&tracked).unwrap();
        assert_eq!(detect_title_from_directory(&tracked).as_deref(), Some("棋魂"));

        let prefixed = root.path().join("[Kmoe]蠟筆小新");
        fs::create_dir_all(&prefixed).unwrap();
        assert_eq!(detect_title_from_directory(&prefixed).as_deref(), Some("蠟筆小新"));

        let loose = root.path().join("misc");
        fs::create_dir_all(&loose).unwrap();
        fs::write(loose.join("[Mox][火影忍者]卷01.epub"), b"x").unwrap();
        assert_eq!(detect_title_from_directory(&loose).as_deref(), Some("火影忍者"));

        let archived = root.path().join("packed");
        fs::create_dir_all(&archived).unwrap();
        write_zip(&archived.join("all.zip"), &[("[Kmoe][海賊王]卷 1.epub", "x")]);
        assert_eq!(detect_title_from_directory(&archived).as_deref(), Some("海賊王"));

        let plain = root.path().join("My Comic_v2");
        fs::create_dir_all(&plain).unwrap();
        assert_eq!(detect_title_from_directory(&plain), None);
        fs::write(plain.join("01.epub"), b"x").unwrap();
        assert_eq!(detect_title_from_directory(&plain).as_deref(), Some("My Comic_v2"));
    }

    #[test]
    fn import_records_matches_and_renames_directory() {
        let root = TempDir::new().unwrap();
        let store = LibraryStore::new(root.path());
        let dir = root.path().join("old name");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("[Kmoe][測試]卷 01.mobi"), vec![0u8; 32]).unwrap();
        write_zip(&dir.join("rest.zip"), &[("[Kmoe][測試]卷 02.epub", "12")]);
        fs::write(dir.join("extra.epub"), b"?").unwrap();

        let detail = ComicDetail {
            meta: ComicMeta {
                book_id: "555".into(),
                comic_id: "abc123".into(),
                title: "測試".into(),
                ..ComicMeta::default()
            },
            volumes: vec![Volume::new("1", "卷 01"), Volume::new("2", "卷 02")],
        };

        let (entry, unmatched) = import_directory(&store, &dir, "abc123", &detail).unwrap();
        assert_eq!(entry.downloaded_volumes.len(), 2);
        assert!(entry.is_complete);
        assert_eq!(unmatched.len(), 1);
        assert_eq!(unmatched[0].name, "extra.epub");

        let mobi = entry.find_downloaded("1", "mobi").unwrap();
        assert_eq!(mobi.size_bytes, 32);
        let epub = entry.find_downloaded("2", "epub").unwrap();
        assert_eq!(epub.filename, "rest.zip/[Kmoe][測試]卷 02.epub");

        let canonical = root.path().join("測試_abc123");
        assert!(!dir.exists());
        assert_eq!(store.load_entry_in(&canonical).unwrap(), entry);
        assert_eq!(store.load_index().unwrap().comics.len(), 1);
        assert_eq!(store.index_rebuilds(), 1);
    }

    #[test]
    fn import_keeps_directory_when_canonical_exists() {
        let root = TempDir::new().unwrap();
        let store = LibraryStore::new(root.path());
        fs::create_dir_all(root.path().join("測試_abc123")).unwrap();
        let dir = root.path().join("other");
        fs::create_dir_all(&dir).unwrap();

        let detail = ComicDetail {
            meta: ComicMeta {
                book_id: "555".into(),
                title: "測試".into(),
                ..ComicMeta::default()
            },
            volumes: vec![],
        };
        let (entry, _) = import_directory(&store, &dir, "abc123", &detail).unwrap();
        assert!(dir.join("library.json").exists());
        assert!(!entry.is_complete);
    }
}
