//! End-to-end tool scenarios driven through the public API

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;
use tracing_subscriber::EnvFilter;

use waive_core::{sanitize_path_component, EditSession, Project, SessionHost};
use waive_services::model_store::PAYLOAD_FILE;
use waive_services::tools::align::AlignClipsByTransient;
use waive_services::tools::normalize::NormalizeSelectedClips;
use waive_services::tools::silence::DetectSilenceAndCutRegions;
use waive_services::tools::{PlanTask, Tool};
use waive_services::{
    AnalysisCache, JobMeta, JobQueue, JobStatus, ModelStore, PlanOutcome, ProgressToken, ToolContext, ToolRegistry,
    ToolSession, WaiveError,
};

const SAMPLE_RATE: u32 = 8000;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn write_wav(path: &Path, seconds: f64, f: impl Fn(f64) -> f32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = (seconds * f64::from(SAMPLE_RATE)) as usize;
    for i in 0..frames {
        let t = i as f64 / f64::from(SAMPLE_RATE);
        writer.write_sample((f(t) * 32767.0) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

fn context(root: &Path) -> ToolContext {
    let models = ModelStore::new(root.join("models")).unwrap();
    ToolContext::new(Arc::new(models), Arc::new(AnalysisCache::default()))
}

/// Run a planner on a queue worker and wait for it
fn plan_on_queue(task: PlanTask) -> waive_core::ToolPlan {
    let queue = JobQueue::new();
    let slot = Arc::new(std::sync::Mutex::new(None));
    let writer = slot.clone();
    let run = task.run;
    queue.submit(
        JobMeta::new(task.job_name, "tool_plan"),
        Box::new(move |token: &ProgressToken| {
            let plan = run(token)?;
            *writer.lock().unwrap() = Some(plan);
            Ok(())
        }),
        None,
    );
    assert!(queue.wait_idle(Duration::from_secs(10)));
    slot.lock().unwrap().take().unwrap()
}

#[test]
fn normalize_apply_undo_redo() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("a.wav");
    write_wav(&wav, 1.0, |t| (0.25 * (t * 440.0 * std::f64::consts::TAU).sin()) as f32);

    let mut project = Project::new();
    let track = project.add_track("Track 1");
    let a = project.add_wave_clip(track, "A", &wav, 0.0, 1.0).unwrap();
    project.select([a]);
    let mut session = EditSession::new(project);

    let tool = NormalizeSelectedClips;
    let task = tool
        .prepare_plan(&context(dir.path()), &session.snapshot(), &json!({ "target_peak_db": -6.0 }))
        .unwrap();
    let plan = plan_on_queue(task);
    assert!(plan.summary.starts_with("Normalize 1 clip(s) to target peak -6.0 dBFS"));

    tool.apply(&mut session, &plan).unwrap();
    let applied = session.project().get_clip(a).unwrap().gain_db;
    assert!((applied - 6.0).abs() < 0.1, "gain {applied}");

    assert!(session.undo());
    assert_eq!(session.project().get_clip(a).unwrap().gain_db, 0.0);
    assert!(session.redo());
    assert!((session.project().get_clip(a).unwrap().gain_db - applied).abs() < 0.05);
}

#[test]
fn silence_cut_trims_both_ends() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("speech.wav");
    write_wav(&wav, 1.0, |t| if (0.20..0.72).contains(&t) { 0.5 } else { 0.0 });

    let mut project = Project::new();
    let track = project.add_track("Dialog");
    let clip = project.add_wave_clip(track, "Line", &wav, 1.80, 2.80).unwrap();
    project.select([clip]);
    let mut session = EditSession::new(project);

    let tool = DetectSilenceAndCutRegions;
    let params = json!({ "threshold_db": -40.0, "min_trim_ms": 60.0, "padding_ms": 0.0 });
    let plan = plan_on_queue(tool.prepare_plan(&context(dir.path()), &session.snapshot(), &params).unwrap());
    assert_eq!(plan.changes.len(), 2);

    tool.apply(&mut session, &plan).unwrap();
    let trimmed = session.project().get_clip(clip).unwrap();
    assert!((trimmed.start_seconds - 2.00).abs() < 0.05, "start {}", trimmed.start_seconds);
    assert!((trimmed.end_seconds - 2.52).abs() < 0.05, "end {}", trimmed.end_seconds);
}

#[test]
fn align_by_transient_moves_late_clip() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let early = dir.path().join("early.wav");
    let late = dir.path().join("late.wav");
    let click = |onset: f64| move |t: f64| if (onset..onset + 0.02).contains(&t) { 0.8_f32 } else { 0.0 };
    write_wav(&early, 1.5, click(0.82));
    write_wav(&late, 1.5, click(0.60));

    let mut project = Project::new();
    let t0 = project.add_track("Kick");
    let t1 = project.add_track("Snare");
    let a = project.add_wave_clip(t0, "Kick", &early, 3.0, 4.5).unwrap(); // onset at 3.82
    let b = project.add_wave_clip(t1, "Snare", &late, 3.5, 5.0).unwrap(); // onset at 4.10
    project.select([a, b]);
    let mut session = EditSession::new(project);

    let tool = AlignClipsByTransient;
    let plan = plan_on_queue(tool.prepare_plan(&context(dir.path()), &session.snapshot(), &json!({})).unwrap());
    tool.apply(&mut session, &plan).unwrap();

    let kick = session.project().get_clip(a).unwrap();
    let snare = session.project().get_clip(b).unwrap();
    assert!((kick.start_seconds - 3.0).abs() < 0.05);
    assert!((3.5 - snare.start_seconds - 0.28).abs() < 0.05, "snare {}", snare.start_seconds);
}

#[test]
fn cancelled_plan_changes_nothing() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("a.wav");
    write_wav(&wav, 0.5, |_| 0.25);

    let mut project = Project::new();
    let track = project.add_track("Track 1");
    let a = project.add_wave_clip(track, "A", &wav, 0.0, 0.5).unwrap();
    project.select([a]);
    let mut session = EditSession::new(project);

    let mut tools = ToolSession::new(ToolRegistry::new(), context(dir.path()));
    let job = tools
        .run_tool("normalize_selected_clips", &json!({ "analysis_delay_ms": 1500 }), &session)
        .unwrap();
    thread::sleep(Duration::from_millis(60));
    assert!(tools.job_queue().cancel_job(job));

    let outcome = tools.wait_for_plan(&mut session, Duration::from_secs(5));
    assert_eq!(outcome, Some(PlanOutcome::Cancelled));
    assert_eq!(tools.job_queue().status(job), Some(JobStatus::Cancelled));
    assert!(tools.pending_plan().is_none());
    assert_eq!(session.project().get_clip(a).unwrap().gain_db, 0.0);
    assert!(!session.can_undo());
}

#[test]
fn model_install_respects_quota() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("models");
    let store = ModelStore::new(&root).unwrap();

    store.set_quota_bytes(96 * 1024).unwrap();
    let err = store.install("stem_separator", Some("1.1.0"), false).unwrap_err();
    assert!(matches!(err, WaiveError::OverQuota));

    store.set_quota_bytes(512 * 1024 * 1024).unwrap();
    store.install("stem_separator", Some("1.1.0"), true).unwrap();

    let info = store.resolve_installed("stem_separator", None).unwrap();
    assert_eq!(info.version, "1.1.0");
    assert!(info.pinned);

    let model_root = root.join("stem_separator");
    let versions: Vec<String> = fs::read_dir(&model_root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(versions, ["1.1.0"]);
    let mut files: Vec<String> = fs::read_dir(model_root.join("1.1.0"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    assert_eq!(files, ["manifest.json", PAYLOAD_FILE]);
    assert_eq!(fs::metadata(model_root.join("1.1.0").join(PAYLOAD_FILE)).unwrap().len(), 262_144);
}

#[test]
fn path_sanitiser_rejects_and_accepts() {
    for bad in ["..", "../etc", "foo/bar", "foo\\bar", "bad\u{1f}name"] {
        assert_eq!(sanitize_path_component(bad), "", "{bad:?}");
    }
    for good in ["valid_name", "model-1.0.0", "ABC123"] {
        assert_eq!(sanitize_path_component(good), good);
    }
}
