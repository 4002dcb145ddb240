use std::cell::RefCell;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use httpmock::Method::GET;
use httpmock::MockServer;
use zip::write::FileOptions;

use smwc_fetch::checksum::md5_stream;
use smwc_fetch::config::Config;
use smwc_fetch::fetch::SmwcApi;
use smwc_fetch::patch::Patcher;
use smwc_fetch::pipeline::run_with;
use smwc_fetch::types::PatchStatus;

#[derive(Default)]
struct RecordingPatcher {
    calls: RefCell<Vec<Vec<PathBuf>>>,
}

impl Patcher for RecordingPatcher {
    fn apply(&self, patch: &Path, base: &Path, out: &Path) -> anyhow::Result<PatchStatus> {
        self.calls.borrow_mut().push(vec![
            patch.to_path_buf(),
            base.to_path_buf(),
            out.to_path_buf(),
        ]);
        let mut rom = fs::read(base)?;
        rom.extend_from_slice(&fs::read(patch)?);
        fs::write(out, rom)?;
        Ok(PatchStatus::ok())
    }
}

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zipw = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in entries {
        zipw.start_file::<_, ()>(*name, FileOptions::default())
            .unwrap();
        zipw.write_all(body).unwrap();
    }
    zipw.finish().unwrap().into_inner()
}

struct Fixture {
    _dir: tempfile::TempDir,
    server: MockServer,
    config: Config,
}

impl Fixture {
    fn new(ids: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        fs::create_dir_all(&work).unwrap();

        let rom = dir.path().join("smw.sfc");
        let rom_body = vec![0x5au8; 2048];
        fs::write(&rom, &rom_body).unwrap();
        let (rom_md5, _) = md5_stream(&rom_body[..]).unwrap();

        let list = dir.path().join("list.txt");
        fs::write(&list, ids).unwrap();

        let server = MockServer::start();
        let mut config = Config::with_work_dir(work);
        config.list = list;
        config.base_rom = rom;
        config.base_rom_md5 = rom_md5;
        config.api = server.url("/ajax.php");
        config.max_retries = 1;
        config.quiet = 1;

        Self {
            _dir: dir,
            server,
            config,
        }
    }

    fn serve_file(&self, id: &str, archive_name: &str, archive: Vec<u8>) {
        let archive_path = format!("/dl/{id}/{archive_name}");
        let download_url = self.server.url(&archive_path);
        let id = id.to_string();
        self.server.mock(|when, then| {
            when.method(GET)
                .path("/ajax.php")
                .query_param("a", "getfile")
                .query_param("id", id.as_str());
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({ "name": archive_name, "download_url": download_url }));
        });
        self.server.mock(|when, then| {
            when.method(GET).path(archive_path.as_str());
            then.status(200).body(archive);
        });
    }

    fn api(&self) -> SmwcApi {
        SmwcApi::new(&self.config).unwrap()
    }

    fn leftover_patches(&self) -> Vec<PathBuf> {
        fs::read_dir(&self.config.work_dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().contains(".bps"))
            .collect()
    }

    fn outputs(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.config.output_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

#[test]
fn single_hack_produces_one_rom_and_leaves_no_scratch() {
    let fx = Fixture::new("1234\n");
    fx.serve_file("1234", "hack.zip", zip_bytes(&[("hack.bps", b"PATCH")]));
    let patcher = RecordingPatcher::default();

    let summary = run_with(&fx.config, &fx.api(), |_| Ok(&patcher)).unwrap();

    assert!(summary.succeeded());
    assert_eq!(fx.outputs(), vec!["hack.sfc"]);
    assert!(!fx.config.scratch_dir.exists());
    assert!(fx.leftover_patches().is_empty());
    assert!(!fx.config.work_dir.join("hack.zip").exists());

    let calls = patcher.calls.borrow();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0][0], fx.config.work_dir.join("hack.bps"));
    assert_eq!(calls[0][1], fx.config.base_rom);
    assert_eq!(calls[0][2], fx.config.output_dir.join("hack.sfc"));
}

#[test]
fn one_output_per_patch_across_archives() {
    let fx = Fixture::new("1\n\nhttps://www.smwcentral.net/?p=section&a=details&id=2\n");
    fx.serve_file(
        "1",
        "first.zip",
        zip_bytes(&[("a.bps", b"A"), ("docs/readme.txt", b"r"), ("alt/b.bps", b"B")]),
    );
    fx.serve_file("2", "second.zip", zip_bytes(&[("c.bps", b"C"), ("a.bps", b"A2")]));
    let patcher = RecordingPatcher::default();

    let summary = run_with(&fx.config, &fx.api(), |_| Ok(&patcher)).unwrap();

    assert_eq!(summary.identifiers, 2);
    assert_eq!(summary.patch_files.len(), 4);
    assert_eq!(summary.patches.len(), 4);
    assert_eq!(fx.outputs(), vec!["a (2).sfc", "a.sfc", "b.sfc", "c.sfc"]);
    assert_eq!(summary.cleaned.len(), 4);
    assert!(fx.leftover_patches().is_empty());
    assert!(!fx.config.scratch_dir.exists());
}

#[test]
fn failed_download_aborts_and_cleans_scratch() {
    let fx = Fixture::new("1\n2\n");
    fx.serve_file("1", "first.zip", zip_bytes(&[("a.bps", b"A")]));
    fx.server.mock(|when, then| {
        when.method(GET).path("/ajax.php").query_param("id", "2");
        then.status(500);
    });
    let patcher = RecordingPatcher::default();

    let err = run_with(&fx.config, &fx.api(), |_| Ok(&patcher)).unwrap_err();

    assert!(format!("{err:#}").contains("file 2"));
    assert!(patcher.calls.borrow().is_empty());
    assert!(!fx.config.scratch_dir.exists());
    assert!(fx.leftover_patches().is_empty());
}

#[test]
fn aborted_run_keeps_patches_it_did_not_create() {
    let fx = Fixture::new("1\n2\n");
    fs::write(fx.config.work_dir.join("my_own.bps"), b"MINE").unwrap();
    fx.serve_file("1", "first.zip", zip_bytes(&[("a.bps", b"A")]));
    fx.serve_file("2", "broken.zip", b"not a zip".to_vec());
    let patcher = RecordingPatcher::default();

    let err = run_with(&fx.config, &fx.api(), |_| Ok(&patcher)).unwrap_err();

    assert!(format!("{err:#}").contains("broken.zip"));
    assert!(patcher.calls.borrow().is_empty());
    assert_eq!(fs::read(fx.config.work_dir.join("my_own.bps")).unwrap(), b"MINE");
    assert!(!fx.config.work_dir.join("a.bps").exists());
    assert!(!fx.config.work_dir.join("broken.zip").exists());
    assert!(!fx.config.scratch_dir.exists());
}

#[test]
fn archives_sharing_a_name_both_get_patched() {
    let fx = Fixture::new("1\n2\n");
    fx.serve_file("1", "hack.zip", zip_bytes(&[("one.bps", b"1")]));
    fx.serve_file("2", "hack.zip", zip_bytes(&[("two.bps", b"2")]));
    let patcher = RecordingPatcher::default();

    let summary = run_with(&fx.config, &fx.api(), |_| Ok(&patcher)).unwrap();

    assert!(summary.succeeded());
    assert_eq!(fx.outputs(), vec!["one.sfc", "two.sfc"]);
    assert!(fx.leftover_patches().is_empty());
}

#[test]
fn keep_going_patches_what_it_could_fetch() {
    let mut fx = Fixture::new("1\n2\n");
    fx.config.keep_going = true;
    fx.serve_file("2", "second.zip", zip_bytes(&[("b.bps", b"B")]));
    fx.server.mock(|when, then| {
        when.method(GET).path("/ajax.php").query_param("id", "1");
        then.status(404);
    });
    let patcher = RecordingPatcher::default();

    let summary = run_with(&fx.config, &fx.api(), |_| Ok(&patcher)).unwrap();

    assert!(!summary.succeeded());
    assert_eq!(summary.fetch_failures.len(), 1);
    assert_eq!(summary.fetch_failures[0].identifier, "1");
    assert_eq!(fx.outputs(), vec!["b.sfc"]);
}

#[test]
fn invalid_base_rom_stops_before_any_request() {
    let mut fx = Fixture::new("1\n");
    let lookup = fx.server.mock(|when, then| {
        when.method(GET).path("/ajax.php");
        then.status(200);
    });
    fx.config.base_rom_md5 = "00000000000000000000000000000000".to_string();
    let patcher = RecordingPatcher::default();

    let err = run_with(&fx.config, &fx.api(), |_| Ok(&patcher)).unwrap_err();

    assert!(err.to_string().contains("Invalid SMW base ROM"));
    assert_eq!(lookup.calls(), 0);
}
