//! Self-test of an upload method.
//!
//! A single-shot test uploads one small file. A full test run repeats the
//! upload for every combination of base folder and sub folder, because
//! backends disagree about leading/trailing slashes and `.` segments.

use chrono::Local;
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;

use crate::config::ConfigStore;
use crate::logger::UploadLogger;
use crate::path::concat_path;
use crate::uploaders::{Uploader, get_uploader};

pub const DEFAULT_TEST_FILE_NAME: &str = "testfile.txt";
pub const DEFAULT_TEST_FILE_SIZE: usize = 1000;
/// Pause between variants of a full run, to stay clear of rate limits.
pub const VARIANT_DELAY: Duration = Duration::from_millis(2222);
const WRITE_CHUNK_SIZE: usize = 1024;

/// How a test ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every upload succeeded.
    Passed,
    /// The upload to `path` failed; nothing after it was attempted.
    Failed { path: String },
    /// Stopped by a cancellation request.
    Interrupted,
    /// Nothing was uploaded (bad method, disabled backend, local I/O failure).
    Aborted,
}

/// Base folders of a full run, in the order they are tried.
pub fn base_folders(alt_folder: &str) -> [String; 4] {
    [
        String::new(),
        "/".to_string(),
        "./".to_string(),
        alt_folder.to_string(),
    ]
}

/// Sub folders of a full run, in the order they are tried.
pub fn sub_folders(test_folder: &str) -> [String; 4] {
    [
        String::new(),
        format!("{test_folder}/sub"),
        format!("{test_folder}/sub/"),
        test_folder.to_string(),
    ]
}

/// Remote directories of a full run: base folders outer, sub folders inner.
pub fn variant_paths(alt_folder: &str, test_folder: &str) -> Vec<String> {
    let subs = sub_folders(test_folder);
    base_folders(alt_folder)
        .iter()
        .flat_map(|base| subs.iter().map(move |sub| concat_path(base, sub)))
        .collect()
}

/// Write `size` random bytes to `<dir>/<name>`, creating `dir` if needed.
pub async fn create_test_file(dir: &Path, name: &str, size: usize) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(name);

    let mut data = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut data);

    let mut file = tokio::fs::File::create(&path).await?;
    for chunk in data.chunks(WRITE_CHUNK_SIZE) {
        file.write_all(chunk).await?;
    }
    file.flush().await?;
    Ok(path)
}

/// Runs single-shot tests and full test runs for one initiator.
pub struct TestRunner {
    store: ConfigStore,
    logger: Arc<dyn UploadLogger>,
    delay: Duration,
    cancel: Option<watch::Receiver<bool>>,
}

impl TestRunner {
    pub fn new(store: ConfigStore, logger: Arc<dyn UploadLogger>) -> Self {
        Self {
            store,
            logger,
            delay: VARIANT_DELAY,
            cancel: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Stop a full run once `cancel` turns `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Entry point for `test <method> [alternate folder words...]`.
    pub async fn run(&self, args: &[String]) -> RunOutcome {
        let Some(method) = args.first() else {
            self.logger
                .initiator_error("a backup method to test must be specified");
            return RunOutcome::Aborted;
        };

        if args.len() > 1 {
            let alt_folder = args[1..].join(" ");
            let outcome = self
                .full_test_run(method, DEFAULT_TEST_FILE_SIZE, &alt_folder)
                .await;
            if let Err(e) = self.store.reload_local() {
                tracing::error!("Failed to reload configuration after test run: {}", e);
            }
            outcome
        } else {
            self.test_upload_method(DEFAULT_TEST_FILE_NAME, DEFAULT_TEST_FILE_SIZE, method)
                .await
        }
    }

    /// Upload one test file with `method`, report the result and clean up.
    pub async fn test_upload_method(
        &self,
        test_file_name: &str,
        test_file_size: usize,
        method: &str,
    ) -> RunOutcome {
        let Some(mut uploader) = get_uploader(method, &self.store, self.logger.clone()) else {
            return RunOutcome::Aborted;
        };
        let name = uploader.name();
        self.logger.log(&format!("Beginning the test on {name}"));

        let local_dir = PathBuf::from(self.store.snapshot().local_directory);
        let test_file = match create_test_file(&local_dir, test_file_name, test_file_size).await {
            Ok(path) => path,
            Err(e) => {
                self.logger.log("Failed to create the test file");
                tracing::error!("Failed to create test file in {}: {}", local_dir.display(), e);
                uploader.close().await;
                return RunOutcome::Aborted;
            }
        };

        uploader.test(&test_file).await;

        let outcome = if uploader.is_error_while_uploading() {
            self.logger
                .log(&format!("The {name} test was unsuccessful, check the server log"));
            RunOutcome::Failed {
                path: concat_path(&self.store.snapshot().remote_directory, test_file_name),
            }
        } else {
            self.logger.log(&format!("The {name} test was successful"));
            RunOutcome::Passed
        };

        if let Err(e) = tokio::fs::remove_file(&test_file).await {
            tracing::warn!("Failed to delete test file {}: {}", test_file.display(), e);
        }
        uploader.close().await;
        outcome
    }

    /// Upload a test file with `method` to every path variant, stopping at the first failure.
    pub async fn full_test_run(
        &self,
        method: &str,
        test_file_size: usize,
        alt_folder: &str,
    ) -> RunOutcome {
        let Some(mut uploader) = get_uploader(method, &self.store, self.logger.clone()) else {
            return RunOutcome::Aborted;
        };
        let outcome = self
            .full_test_run_with(uploader.as_mut(), test_file_size, alt_folder)
            .await;
        uploader.close().await;
        outcome
    }

    /// Full test run on an uploader the caller owns. The local test file is left in place.
    pub async fn full_test_run_with(
        &self,
        uploader: &mut dyn Uploader,
        test_file_size: usize,
        alt_folder: &str,
    ) -> RunOutcome {
        let timestamp = Local::now().format("%Y%m%d%H%M%S").to_string();
        let test_file_name = format!("DriveBackupV2TestFile{timestamp}.txt");
        let test_folder = format!("DriveBackupV2TestFolder{timestamp}");

        self.logger.log("begin full test run");

        let local_dir = PathBuf::from(self.store.snapshot().local_directory);
        let test_file = match create_test_file(&local_dir, &test_file_name, test_file_size).await
        {
            Ok(path) => path,
            Err(e) => {
                tracing::error!("Failed to create test file in {}: {}", local_dir.display(), e);
                return RunOutcome::Aborted;
            }
        };

        for folder in variant_paths(alt_folder, &test_folder) {
            self.store.set_remote_directory(&folder);
            if let Err(e) = self.store.reload() {
                tracing::error!("Failed to reload configuration for {:?}: {}", folder, e);
                return RunOutcome::Aborted;
            }

            uploader.test(&test_file).await;

            let remote_path = concat_path(&folder, &test_file_name);
            if uploader.is_error_while_uploading() {
                self.logger.log(&format!("FAIL: {remote_path}"));
                return RunOutcome::Failed { path: remote_path };
            }
            self.logger.log(&format!("PASS: {remote_path}"));

            if self.pause().await {
                self.logger.log("test run interrupted");
                return RunOutcome::Interrupted;
            }
        }

        self.logger.log("end of full test run");
        RunOutcome::Passed
    }

    /// Wait out the inter-variant delay. Returns `true` when cancelled.
    async fn pause(&self) -> bool {
        let Some(cancel) = &self.cancel else {
            tokio::time::sleep(self.delay).await;
            return false;
        };
        let mut cancel = cancel.clone();
        if *cancel.borrow_and_update() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => false,
            changed = async { cancel.wait_for(|stop| *stop).await.map(|_| ()) } => match changed {
                Ok(_) => true,
                Err(_) => {
                    // Sender gone: nobody can cancel any more.
                    tokio::time::sleep(self.delay).await;
                    false
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::logger::MemoryLogger;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Records the remote directory of every test and fails on request.
    struct FakeUploader {
        store: ConfigStore,
        fail_when: Box<dyn Fn(&str) -> bool + Send>,
        seen: Vec<String>,
        error: bool,
    }

    impl FakeUploader {
        fn new(store: ConfigStore, fail_when: impl Fn(&str) -> bool + Send + 'static) -> Self {
            Self {
                store,
                fail_when: Box::new(fail_when),
                seen: Vec::new(),
                error: false,
            }
        }
    }

    #[async_trait]
    impl Uploader for FakeUploader {
        fn name(&self) -> &'static str {
            "Fake"
        }

        async fn test(&mut self, file: &Path) {
            assert!(file.exists());
            let dir = self.store.snapshot().remote_directory;
            self.error = (self.fail_when)(&dir);
            self.seen.push(dir);
        }

        fn is_error_while_uploading(&self) -> bool {
            self.error
        }

        async fn close(&mut self) {}
    }

    fn setup() -> (TempDir, ConfigStore, Arc<MemoryLogger>) {
        let tmp = TempDir::new().unwrap();
        let settings = Settings {
            local_directory: tmp.path().join("local").to_string_lossy().into_owned(),
            ..Settings::default()
        };
        (tmp, ConfigStore::from_settings(settings), Arc::new(MemoryLogger::new()))
    }

    #[test]
    fn test_variant_paths_order() {
        let paths = variant_paths("alt", "T");
        assert_eq!(
            paths,
            vec![
                "", "T/sub", "T/sub/", "T",
                "/", "/T/sub", "/T/sub/", "/T",
                "./", "./T/sub", "./T/sub/", "./T",
                "alt", "alt/T/sub", "alt/T/sub/", "alt/T",
            ]
        );
    }

    #[tokio::test]
    async fn test_create_test_file_size() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("nested/dir");

        let path = create_test_file(&dir, "f.txt", 2500).await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 2500);

        let path = create_test_file(&dir, "empty.txt", 0).await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_full_run_visits_every_variant() {
        let (_tmp, store, logger) = setup();
        let runner = TestRunner::new(store.clone(), logger.clone()).with_delay(Duration::ZERO);
        let mut uploader = FakeUploader::new(store.clone(), |_| false);

        let outcome = runner.full_test_run_with(&mut uploader, 100, "alt").await;
        assert_eq!(outcome, RunOutcome::Passed);

        assert_eq!(uploader.seen.len(), 16);
        let folder = uploader.seen[3].clone();
        assert!(folder.starts_with("DriveBackupV2TestFolder"));
        assert_eq!(uploader.seen, variant_paths("alt", &folder));

        let lines = logger.lines();
        assert_eq!(lines.first().map(String::as_str), Some("begin full test run"));
        assert_eq!(lines.last().map(String::as_str), Some("end of full test run"));
        assert_eq!(lines.iter().filter(|l| l.starts_with("PASS: ")).count(), 16);
        assert!(lines[1].starts_with("PASS: DriveBackupV2TestFile"));
        assert!(lines[6].starts_with(&format!("PASS: /{folder}/sub/DriveBackupV2TestFile")));
    }

    #[tokio::test]
    async fn test_full_run_stops_at_first_failure() {
        let (_tmp, store, logger) = setup();
        let runner = TestRunner::new(store.clone(), logger.clone()).with_delay(Duration::ZERO);
        let mut uploader = FakeUploader::new(store.clone(), |dir: &str| {
            dir.starts_with("./") && dir.ends_with("/sub/")
        });

        let outcome = runner.full_test_run_with(&mut uploader, 100, "alt").await;
        let RunOutcome::Failed { path } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(path.starts_with("./DriveBackupV2TestFolder"));

        let lines = logger.lines();
        let fail_at = lines.iter().position(|l| l.starts_with("FAIL: ")).unwrap();
        assert_eq!(fail_at, lines.len() - 1);
        assert_eq!(lines[fail_at], format!("FAIL: {path}"));
        assert_eq!(lines.iter().filter(|l| l.starts_with("PASS: ")).count(), 10);
        assert_eq!(uploader.seen.len(), 11);
    }

    #[tokio::test]
    async fn test_full_run_reconfigures_remote_directory() {
        let (_tmp, store, logger) = setup();
        let runner = TestRunner::new(store.clone(), logger).with_delay(Duration::ZERO);
        let mut uploader = FakeUploader::new(store.clone(), |_| false);

        runner.full_test_run_with(&mut uploader, 10, "x").await;
        assert!(store.snapshot().remote_directory.starts_with("x/"));

        store.reload_local().unwrap();
        assert_eq!(store.snapshot().remote_directory, "backups");
    }

    #[tokio::test]
    async fn test_full_run_can_be_cancelled() {
        let (_tmp, store, logger) = setup();
        let (tx, rx) = watch::channel(false);
        let runner = TestRunner::new(store.clone(), logger.clone())
            .with_delay(Duration::from_secs(3600))
            .with_cancellation(rx);
        let mut uploader = FakeUploader::new(store.clone(), |_| false);

        tx.send(true).unwrap();
        let outcome = runner.full_test_run_with(&mut uploader, 10, "alt").await;

        assert_eq!(outcome, RunOutcome::Interrupted);
        assert_eq!(uploader.seen.len(), 1);
        let lines = logger.lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "test run interrupted");
    }

    #[tokio::test]
    async fn test_run_without_method() {
        let (_tmp, store, logger) = setup();
        let runner = TestRunner::new(store, logger.clone());

        assert_eq!(runner.run(&[]).await, RunOutcome::Aborted);
        assert_eq!(
            logger.lines(),
            vec!["a backup method to test must be specified"]
        );
    }

    #[tokio::test]
    async fn test_single_shot_on_disabled_backend() {
        let (_tmp, store, logger) = setup();
        let runner = TestRunner::new(store, logger.clone());

        let outcome = runner.run(&["s3".to_string()]).await;
        assert_eq!(outcome, RunOutcome::Aborted);
        assert_eq!(logger.lines(), vec!["S3 backups are not enabled"]);
    }

    #[tokio::test]
    async fn test_full_run_with_invalid_method() {
        let (_tmp, store, logger) = setup();
        let runner = TestRunner::new(store.clone(), logger.clone());

        let args = ["box".to_string(), "my".to_string(), "folder".to_string()];
        assert_eq!(runner.run(&args).await, RunOutcome::Aborted);
        assert_eq!(logger.lines(), vec!["box is not a valid backup method"]);
        assert_eq!(store.snapshot().remote_directory, "backups");
    }
}
