#![cfg(unix)]

mod common;

use common::{encoded_bytes, fake_tools, Scratch, KIB, LIMIT};
use disconvert::encode::Encoder;
use disconvert::shrink::{compress_under, CrfSearch, ShrinkOutcome};

#[tokio::test]
async fn first_fitting_crf_wins() {
    let scratch = Scratch::new();
    let input = scratch.video("big.mp4", "h264", 30 * KIB);
    std::fs::create_dir(scratch.out()).unwrap();
    let output = scratch.out().join("small.mp4");
    std::fs::write(&output, b"old").unwrap();

    let encoder = Encoder::new(&fake_tools());
    let outcome = compress_under(&encoder, CrfSearch::default(), &input, &output, LIMIT)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ShrinkOutcome::Fits {
            path: output.clone(),
            size: LIMIT,
            crf: 30,
        }
    );
    assert_eq!(std::fs::read(&output).unwrap(), encoded_bytes(30));
    assert_eq!(scratch.encoder_runs(), vec![28, 30]);
    assert_eq!(scratch.out_files(), vec!["small.mp4"]);
}

#[tokio::test]
async fn exhausted_search_leaves_no_candidate() {
    let scratch = Scratch::new();
    let input = scratch.video("big.mp4", "h264", 30 * KIB);
    std::fs::create_dir(scratch.out()).unwrap();
    let output = scratch.out().join("small.mp4");
    // A copy from an earlier run is neither a result nor deleted.
    std::fs::write(&output, b"old").unwrap();

    let encoder = Encoder::new(&fake_tools());
    let outcome = compress_under(&encoder, CrfSearch::default(), &input, &output, 4)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ShrinkOutcome::Exhausted {
            attempts: 12,
            smallest: Some(5),
        }
    );
    assert!(!outcome.is_success());
    assert_eq!(scratch.out_files(), vec!["small.mp4"]);
    assert_eq!(std::fs::read(&output).unwrap(), b"old");

    let runs = scratch.encoder_runs();
    assert_eq!(runs.len(), 12);
    assert!(runs.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(runs.last(), Some(&50));
}

#[tokio::test]
async fn encoder_failure_stops_immediately() {
    let scratch = Scratch::new();
    let input = scratch.video("broken.mkv", "broken", 30 * KIB);
    std::fs::create_dir(scratch.out()).unwrap();
    let output = scratch.out().join("small.mkv");
    std::fs::write(&output, b"previous copy").unwrap();

    let encoder = Encoder::new(&fake_tools());
    let outcome = compress_under(&encoder, CrfSearch::default(), &input, &output, LIMIT)
        .await
        .unwrap();

    assert!(matches!(outcome, ShrinkOutcome::Failed { crf: Some(28), .. }));
    assert_eq!(scratch.encoder_runs(), vec![28]);
    assert_eq!(scratch.out_files(), vec!["small.mkv"]);
    assert_eq!(std::fs::read(&output).unwrap(), b"previous copy");
}

#[tokio::test]
async fn refuses_to_overwrite_its_input() {
    let scratch = Scratch::new();
    let input = scratch.video("big.mp4", "h264", 30 * KIB);

    let encoder = Encoder::new(&fake_tools());
    let err = compress_under(&encoder, CrfSearch::default(), &input, &input, LIMIT)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("onto itself"));
    assert_eq!(std::fs::metadata(&input).unwrap().len(), 30 * KIB);
    assert!(scratch.encoder_runs().is_empty());
}
