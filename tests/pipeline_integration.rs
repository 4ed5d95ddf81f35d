use anyhow::Result;
use std::sync::Arc;

use cricklens::config::CrickLensConfig;
use cricklens::encoder::{default_codec_profiles, VideoEncoder};
use cricklens::mock::{neutral_pose, pose_with, MemoryFrameSource, MemoryWriterBackend, MockPoseDetector};
use cricklens::pipeline::FrameStatus;
use cricklens::pose::{Landmark, PoseLandmark};
use cricklens::{JointRisks, RiskLevel, VideoAnalyzer};

fn analyzer_with(
    detector: MockPoseDetector,
    backend: Arc<MemoryWriterBackend>,
    output_dir: &std::path::Path,
) -> VideoAnalyzer {
    let mut config = CrickLensConfig::default();
    config.pipeline.output_dir = output_dir.to_path_buf();
    let encoder = VideoEncoder::new(backend, default_codec_profiles(), config.encoder.min_fps);
    VideoAnalyzer::new(Arc::new(detector), encoder, &config)
}

#[tokio::test]
async fn test_frame_cap_limits_records_to_one_hundred() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let backend = Arc::new(MemoryWriterBackend::new());
    let analyzer = analyzer_with(MockPoseDetector::always(neutral_pose()), backend.clone(), dir.path());

    let mut source = MemoryFrameSource::solid(250, 16, 12, 30.0);
    let summary = analyzer.analyze_source(&mut source).await?;

    assert_eq!(summary.total_frames, 100);
    assert_eq!(summary.frame_data.len(), 100);
    assert_eq!(source.served(), 100);
    assert_eq!(backend.frame_count(&summary.output_video_path), Some(100));

    println!("✅ 250-frame input produced exactly 100 frame records");
    Ok(())
}

#[tokio::test]
async fn test_video_without_poses_still_produces_output() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let backend = Arc::new(MemoryWriterBackend::new().writing_files());
    let analyzer = analyzer_with(MockPoseDetector::never(), backend.clone(), dir.path());

    let mut source = MemoryFrameSource::solid(20, 16, 12, 0.0);
    let summary = analyzer.analyze_source(&mut source).await?;

    assert_eq!(summary.max_injury_risk, JointRisks::default());
    assert_eq!(summary.exercises.len(), 1);
    assert_eq!(summary.exercises[0].name, "General Warm-Up");
    assert!(summary.frame_data.iter().all(|r| r.status == FrameStatus::NoPoseDetected));
    assert!(summary.video_exists);
    assert!(summary.output_video_path.starts_with(dir.path()));
    assert_eq!(backend.frame_count(&summary.output_video_path), Some(20));

    println!("✅ Pose-free video was written unannotated with a warm-up recommendation");
    Ok(())
}

#[tokio::test]
async fn test_worst_frame_drives_the_summary() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let bent_knee = pose_with(&[(PoseLandmark::LeftAnkle, Landmark::new(0.4, 0.6))]);
    let script = vec![Some(neutral_pose()), Some(bent_knee), Some(neutral_pose()), None];
    let analyzer = analyzer_with(
        MockPoseDetector::scripted(script),
        Arc::new(MemoryWriterBackend::new()),
        dir.path(),
    );

    let mut source = MemoryFrameSource::solid(4, 100, 100, 30.0);
    let summary = analyzer.analyze_source(&mut source).await?;

    assert_eq!(summary.max_injury_risk.knees, RiskLevel::High);
    assert_eq!(summary.max_injury_risk.back, RiskLevel::Low);
    assert_eq!(summary.frame_data[1].injury_risk.knees, RiskLevel::High);
    assert_eq!(summary.frame_data[2].injury_risk.knees, RiskLevel::Low);
    assert_eq!(summary.frame_data[3].status, FrameStatus::NoPoseDetected);

    let names: Vec<&str> = summary.exercises.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Quadriceps Stretch"]);
    assert!(summary.render_report().contains("- Knees: High"));
    Ok(())
}

#[tokio::test]
async fn test_encoder_fallback_is_reported_in_summary() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let backend = Arc::new(MemoryWriterBackend::failing(&["libx264"]));
    let analyzer = analyzer_with(MockPoseDetector::never(), backend.clone(), dir.path());

    let mut source = MemoryFrameSource::solid(5, 8, 8, 24.0);
    let summary = analyzer.analyze_source(&mut source).await?;

    assert_eq!(summary.codec, "xvid");
    assert_eq!(summary.output_video_path.extension().and_then(|e| e.to_str()), Some("avi"));
    assert_eq!(backend.frame_count(&summary.output_video_path), Some(5));
    Ok(())
}

#[tokio::test]
async fn test_every_codec_failing_fails_the_request() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let backend = Arc::new(MemoryWriterBackend::failing(&["libx264", "mpeg4", "mjpeg"]));
    let analyzer = analyzer_with(MockPoseDetector::never(), backend, dir.path());

    let mut source = MemoryFrameSource::solid(5, 8, 8, 24.0);
    let err = analyzer.analyze_source(&mut source).await.unwrap_err();

    assert_eq!(
        cricklens::tools::video_error_text(&err),
        "Error: Could not create output video file"
    );
    assert!(analyzer.cache().latest().is_none());
    Ok(())
}
