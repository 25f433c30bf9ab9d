use bpm_analyzer::analysis::{Analysis, TempoAnalyzer};
use bpm_analyzer::model::{sort_by_bpm, Library, Song, SongBpm, SortOrder};
use bpm_analyzer::scheduler::{
    AnalysisEvent, CancelToken, ChannelListener, JobOutcome, NoopListener, Submission,
};
use bpm_analyzer::{AnalyzerConfig, BatchScheduler, OnsetTempoAnalyzer, SongAnalysisStore};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const SAMPLE_RATE: u32 = 44_100;

/// Write a mono kick-drum loop: an exponentially decaying 60 Hz hit on every beat
fn write_kick_track(path: &Path, bpm: f64, seconds: f64) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();

    let period = 60.0 / bpm;
    let len = (seconds * SAMPLE_RATE as f64) as usize;
    for i in 0..len {
        let t = i as f64 / SAMPLE_RATE as f64;
        let since_beat = t % period;
        let sample = (2.0 * std::f64::consts::PI * 60.0 * since_beat).sin()
            * (-since_beat * 40.0).exp()
            * 0.9;
        writer.write_sample((sample * i16::MAX as f64) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

fn open_store(dir: &TempDir) -> Arc<SongAnalysisStore> {
    Arc::new(SongAnalysisStore::open(&dir.path().join("db").join("analysis.sqlite")).unwrap())
}

#[test]
fn test_kick_track_tempo_is_recovered() {
    let dir = TempDir::new().unwrap();
    let analyzer = OnsetTempoAnalyzer::new(AnalyzerConfig::default());

    for bpm in [100.0, 120.0, 140.0] {
        let path = dir.path().join(format!("kick{}.wav", bpm));
        write_kick_track(&path, bpm, 20.0);
        let song = Song::from_path(&path);

        match analyzer.analyze(&song, None, &CancelToken::new()).unwrap() {
            Analysis::Estimated(estimate) => {
                let detected = estimate.bpm.expect("kicks should yield a tempo");
                assert!((detected - bpm).abs() <= 1.0, "{} detected as {}", bpm, detected);
            }
            Analysis::Cancelled => panic!("not cancelled"),
        }
    }
}

#[test]
fn test_batch_analysis_persists_results() {
    let dir = TempDir::new().unwrap();
    let music = dir.path().join("music");
    std::fs::create_dir_all(&music).unwrap();
    write_kick_track(&music.join("a.wav"), 120.0, 10.0);
    write_kick_track(&music.join("b.wav"), 100.0, 10.0);
    std::fs::write(music.join("notes.txt"), "not audio").unwrap();

    let library = Library::scan(&music).unwrap();
    assert_eq!(library.song_count(), 2);

    let store = open_store(&dir);
    let (listener, events) = ChannelListener::new();
    let scheduler = BatchScheduler::new(
        Arc::new(OnsetTempoAnalyzer::default()),
        Arc::clone(&store),
        Arc::new(listener),
        2,
    )
    .unwrap();

    let report = scheduler.analyze_all(library.songs().cloned()).unwrap();
    assert_eq!(report.scheduled, 2);

    let mut finished = 0;
    for event in events.iter() {
        match event {
            AnalysisEvent::Finished(_, outcome) => {
                assert!(matches!(outcome, JobOutcome::Completed(Some(_))), "{:?}", outcome);
                finished += 1;
            }
            AnalysisEvent::AllFinished => break,
            AnalysisEvent::Started(_) => {}
        }
    }
    assert_eq!(finished, 2);
    scheduler.wait_idle();

    // A second batch finds everything analyzed
    let again = scheduler.analyze_all(library.songs().cloned()).unwrap();
    assert_eq!(again.scheduled, 0);
    assert_eq!(again.skipped, 2);

    // Results survive reopening the database
    drop(scheduler);
    drop(store);
    let store = open_store(&dir);
    let mut rows: Vec<SongBpm> = library
        .songs()
        .map(|song| SongBpm {
            song: song.clone(),
            analysis: store.get(song.id).unwrap(),
        })
        .collect();
    assert!(rows.iter().all(|row| row.bpm().is_some()));

    sort_by_bpm(&mut rows, SortOrder::Descending);
    let bpms: Vec<f64> = rows.iter().filter_map(|row| row.bpm()).collect();
    assert!((bpms[0] - 120.0).abs() <= 1.0, "{:?}", bpms);
    assert!((bpms[1] - 100.0).abs() <= 1.0, "{:?}", bpms);
}

#[test]
fn test_undecodable_file_fails_but_finishes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.mp3");
    std::fs::write(&path, b"definitely not an mp3 stream").unwrap();

    let store = open_store(&dir);
    let scheduler = BatchScheduler::new(
        Arc::new(OnsetTempoAnalyzer::default()),
        Arc::clone(&store),
        Arc::new(NoopListener),
        1,
    )
    .unwrap();

    let song = Song::from_path(&path);
    let submission = scheduler.analyze(song.clone(), false).unwrap();
    let outcome = match submission {
        Submission::Scheduled(handle) => handle.wait(),
        other => panic!("expected a scheduled job, got {:?}", other),
    };

    assert!(matches!(outcome, JobOutcome::Failed(_)));
    assert!(!store.is_analyzed(song.id).unwrap());
    assert!(!scheduler.is_running(None));
}

#[test]
fn test_manual_tempo_narrows_result() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("kick.wav");
    write_kick_track(&path, 120.0, 15.0);

    let store = open_store(&dir);
    let song = Song::from_path(&path);
    store.set_manual_bpm(song.id, Some(60.0)).unwrap();

    let scheduler = BatchScheduler::new(
        Arc::new(OnsetTempoAnalyzer::default()),
        Arc::clone(&store),
        Arc::new(NoopListener),
        1,
    )
    .unwrap();

    let submission = scheduler.analyze(song.clone(), false).unwrap();
    submission.handle().unwrap().wait();

    let row = store.get(song.id).unwrap().unwrap();
    assert_eq!(row.manual_bpm, Some(60.0));
    assert!(row.is_analyzed());
    let bpm = row.bpm.expect("the reference window should keep candidates");
    assert!((bpm - 60.0).abs() <= 1.0, "bpm {}", bpm);
}
