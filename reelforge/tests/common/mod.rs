//! Shared stub collaborators for the end-to-end pipeline tests.
//!
//! Each integration binary pulls in the subset it needs.
#![allow(dead_code)]

use async_trait::async_trait;
use reelforge::adapters::AdapterSet;
use reelforge::config::{DataLayout, Settings};
use reelforge::dashboard::{DashboardClient, InMemoryDashboard};
use reelforge::providers::*;
use reelforge::resilience::{
    AsyncHttpClient, CallError, HttpRequest, HttpResponse, ResilientCaller, ResilientCallerConfig,
};
use reelforge::state::StateDb;
use reelforge::store::{ArtifactStore, ItemLocks};
use reelforge::supervisor::Supervisor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Settings over a temp root with every credential stubbed.
pub fn test_settings(root: &Path) -> Settings {
    let root = root.display().to_string();
    let env: std::collections::BTreeMap<&str, String> = [
        ("REELFORGE_ROOT", root),
        ("REELFORGE_DASHBOARD_URL", "https://rows.example".into()),
        ("REELFORGE_DASHBOARD_TOKEN", "tok".into()),
        ("REELFORGE_TEXTGEN_API_KEY", "tok".into()),
        ("REELFORGE_TTS_API_KEY", "tok".into()),
        ("REELFORGE_STOCK_API_KEY", "tok".into()),
        ("REELFORGE_UPLOAD_TOKEN", "tok".into()),
        // Tight discovery keeps the scenario tests fast
        ("REELFORGE_DISCOVERY_SECS", "1".into()),
    ]
    .into_iter()
    .collect();
    Settings::from_lookup(|key| env.get(key).cloned()).unwrap()
}

/// Deterministic text generation.
pub struct StubTextGen;

#[async_trait]
impl TextGenerator for StubTextGen {
    async fn generate_ideas(&self, count: usize) -> Result<Vec<String>, CallError> {
        Ok((0..count).map(|i| format!("Stub idea {}", i)).collect())
    }
    async fn generate_script(&self, _title: &str, _key: &str) -> Result<String, CallError> {
        Ok("word ".repeat(160).trim().to_string())
    }
    async fn generate_metadata(
        &self,
        title: &str,
        _script: &str,
        _key: &str,
    ) -> Result<MetadataDraft, CallError> {
        Ok(MetadataDraft {
            title: title.to_string(),
            description: "A deterministic short. #Shorts".into(),
            tags: vec!["habits".into()],
        })
    }
}

/// TTS returning a fixed 45s-worth audio payload; fails with 503 for the
/// first `failures` calls.
pub struct FlakyTts {
    pub failures: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FlakyTts {
    pub fn new(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for FlakyTts {
    async fn synthesize(&self, _script: &str, _key: &str) -> Result<SynthesizedSpeech, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CallError::Transient {
                message: "HTTP 503: synthesis backend unavailable".into(),
            });
        }
        Ok(SynthesizedSpeech {
            audio: vec![3u8; 48 * 1024],
            timings: Some(vec![
                WordTiming { word: "three".into(), start_ms: 0, end_ms: 400 },
                WordTiming { word: "morning".into(), start_ms: 400, end_ms: 900 },
                WordTiming { word: "habits".into(), start_ms: 900, end_ms: 1400 },
            ]),
        })
    }
}

/// Three portrait candidates per query.
pub struct StubClips;

#[async_trait]
impl ClipSearch for StubClips {
    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<ClipCandidate>, CallError> {
        Ok((0..4)
            .map(|i| ClipCandidate {
                id: format!("clip{}", i),
                url: format!("https://clips.example/clip{}.mp4", i),
                width: 1080,
                height: 1920,
                duration_secs: 20.0,
            })
            .collect())
    }
}

pub struct StubAligner;

#[async_trait]
impl CaptionAligner for StubAligner {
    async fn align(
        &self,
        _script: &str,
        _audio: &[u8],
        _key: &str,
    ) -> Result<Vec<WordTiming>, CallError> {
        Ok(vec![WordTiming { word: "aligned".into(), start_ms: 0, end_ms: 500 }])
    }
}

/// Muxer writing deterministic bytes instead of invoking ffmpeg.
pub struct FakeMuxer;

#[async_trait]
impl MediaMuxer for FakeMuxer {
    async fn probe_duration(&self, _media: &Path) -> Result<Duration, CallError> {
        Ok(Duration::from_secs(45))
    }
    async fn assemble(&self, spec: &MuxSpec, _cancel: CancellationToken) -> Result<(), CallError> {
        std::fs::write(&spec.output, b"assembled-video").map_err(|e| CallError::Unexpected {
            message: e.to_string(),
        })
    }
    async fn burn_captions(
        &self,
        _video: &Path,
        _subtitles: &Path,
        output: &Path,
        _cancel: CancellationToken,
    ) -> Result<(), CallError> {
        std::fs::write(output, b"captioned-video").map_err(|e| CallError::Unexpected {
            message: e.to_string(),
        })
    }
}

/// Publisher answering `pub_<item fingerprint>`; test assertions use the
/// returned URL rather than predicting it.
pub struct StubPublisher;

#[async_trait]
impl VideoPublisher for StubPublisher {
    async fn publish(
        &self,
        _video: &Path,
        _request: UploadRequest,
        idempotency_key: &str,
        _cancel: CancellationToken,
    ) -> Result<PublicationReceipt, CallError> {
        Ok(PublicationReceipt {
            id: format!("pub_{}", idempotency_key),
            url: format!("https://example/pub_{}", idempotency_key),
        })
    }
}

/// HTTP transport always answering one fixed status.
pub struct FixedStatusTransport(pub u16);

#[async_trait]
impl AsyncHttpClient for FixedStatusTransport {
    async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, CallError> {
        Ok(HttpResponse {
            status: self.0,
            body: b"{}".to_vec(),
            retry_after: None,
        })
    }
}

/// Downloader whose transport always succeeds with small clip bytes.
pub fn stub_downloader() -> Arc<FileDownloader> {
    let caller = Arc::new(ResilientCaller::with_transport(
        ResilientCallerConfig::default(),
        Arc::new(FixedStatusTransport(206)) as Arc<dyn AsyncHttpClient>,
    ));
    Arc::new(FileDownloader::new(caller))
}

/// Everything a pipeline test needs to poke at after the run.
pub struct Harness {
    pub dir: TempDir,
    pub dashboard: Arc<InMemoryDashboard>,
    pub db: Arc<StateDb>,
    pub locks: Arc<ItemLocks>,
    pub store: Arc<ArtifactStore>,
    adapters: Arc<AdapterSet>,
}

impl Harness {
    /// Builds the shared stores and adapter set with fully pluggable
    /// collaborators; the scenarios vary one at a time.
    pub fn with_collaborators(
        textgen: Arc<dyn TextGenerator>,
        tts: Arc<dyn SpeechSynthesizer>,
        clips: Arc<dyn ClipSearch>,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let settings = test_settings(&dir.path().join("data"));
        let layout = DataLayout::new(&settings.root);
        layout.prepare().unwrap();

        let dashboard = Arc::new(InMemoryDashboard::new());
        let db = Arc::new(StateDb::open(layout.state_file()).unwrap());
        let locks = Arc::new(ItemLocks::new());
        let store = Arc::new(ArtifactStore::open(layout.artifacts_dir()).unwrap());

        let adapters = Arc::new(AdapterSet::new(
            Arc::clone(&dashboard) as Arc<dyn DashboardClient>,
            textgen,
            tts,
            clips,
            stub_downloader(),
            Arc::new(FakeMuxer),
            Arc::new(StubAligner),
            Arc::new(StubPublisher),
            None,
        ));

        Self {
            dir,
            dashboard,
            db,
            locks,
            store,
            adapters,
        }
    }

    pub fn build(tts: Arc<dyn SpeechSynthesizer>, clips: Arc<dyn ClipSearch>) -> Self {
        Self::with_collaborators(Arc::new(StubTextGen), tts, clips)
    }

    /// Default harness: everything succeeds.
    pub fn happy() -> Self {
        Self::build(Arc::new(FlakyTts::new(0)), Arc::new(StubClips))
    }

    /// A fresh supervisor over the same stores. Building a second one
    /// models a process restart.
    pub fn supervisor(&self) -> Supervisor {
        let settings = test_settings(&self.dir.path().join("data"));
        let layout = DataLayout::new(&settings.root);
        Supervisor::assemble(
            settings,
            layout,
            Arc::clone(&self.db),
            Arc::clone(&self.dashboard) as Arc<dyn DashboardClient>,
            Arc::clone(&self.store),
            Arc::clone(&self.locks),
            Arc::clone(&self.adapters),
            None,
        )
        .unwrap()
    }

    /// Runs a full `run_once` pass under a generous timeout.
    pub async fn run_once(&self) {
        tokio::time::timeout(
            Duration::from_secs(30),
            self.supervisor().run_once(CancellationToken::new()),
        )
        .await
        .expect("run_once should drain")
        .unwrap();
    }
}

/// Counts files under a directory whose name starts with `.tmp-`.
pub fn count_temp_files(root: &Path) -> usize {
    let mut count = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if entry
                .file_name()
                .to_str()
                .map(|n| n.starts_with(".tmp-"))
                .unwrap_or(false)
            {
                count += 1;
            }
        }
    }
    count
}
