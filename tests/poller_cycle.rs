// tests/poller_cycle.rs
//
// End-to-end poll cycles over a scripted feed, a recording channel and a
// memory-backed dedup store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use eas_relay::feed::{AudioError, FetchError};
use eas_relay::notify::ChannelError;
use eas_relay::{identity, PollState};
use tokio::sync::watch;

#[tokio::test]
async fn new_alert_is_delivered_once_and_recorded() {
    let feed = Arc::new(ScriptedFeed::new());
    feed.push(Ok(vec![tornado()]));
    let rig = Rig::new(feed, Arc::new(RecordingChannel::new())).await;

    let report = rig.poller.run_cycle().await;
    assert_eq!(report.fetched, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 0);

    assert_eq!(rig.channel.messages(), vec!["📢 Alert: TornadoWarning 📢"]);
    assert_eq!(rig.channel.files(), 1);
    assert_eq!(rig.journal.lines(), vec![identity(&tornado()).to_string()]);
    assert_eq!(rig.reporter.snapshot().delivered, 1);
    assert_eq!(rig.poller.state(), PollState::Sleeping);
}

#[tokio::test]
async fn already_delivered_alert_is_skipped_next_cycle() {
    let feed = Arc::new(ScriptedFeed::new());
    feed.push(Ok(vec![tornado()]));
    let rig = Rig::new(feed.clone(), Arc::new(RecordingChannel::new())).await;

    rig.poller.run_cycle().await;
    // Same alert again; the feed's own update stamp changes.
    let mut refetched = tornado();
    refetched.last_updated = Some("2025-04-01T18:02:00Z".into());
    feed.push(Ok(vec![refetched]));
    let report = rig.poller.run_cycle().await;

    assert_eq!(report.duplicates, 1);
    assert_eq!(report.posted(), 0);
    assert_eq!(rig.channel.messages().len(), 1);
    assert_eq!(rig.journal.lines().len(), 1);
}

#[tokio::test]
async fn restart_reloads_store_and_does_not_redeliver() {
    let feed = Arc::new(ScriptedFeed::new());
    feed.push(Ok(vec![tornado()]));
    let first = Rig::new(feed.clone(), Arc::new(RecordingChannel::new())).await;
    first.poller.run_cycle().await;
    let journal = first.journal.clone();
    drop(first);

    let channel = Arc::new(RecordingChannel::new());
    let second = Rig::with_journal(feed, channel.clone(), journal).await;
    assert_eq!(second.store.len().await, 1);

    let report = second.poller.run_cycle().await;
    assert_eq!(report.duplicates, 1);
    assert!(channel.sent().is_empty());
}

#[tokio::test]
async fn sent_but_unrecorded_alert_is_redelivered_exactly_once_after_restart() {
    let feed = Arc::new(ScriptedFeed::new());
    feed.push(Ok(vec![tornado()]));
    let first = Rig::new(feed.clone(), Arc::new(RecordingChannel::new())).await;
    first.journal.set_fail_writes(true);

    let report = first.poller.run_cycle().await;
    assert_eq!(report.delivered, 1);
    assert_eq!(report.record_failures, 1);
    assert!(first.journal.lines().is_empty());

    let journal = first.journal.clone();
    journal.set_fail_writes(false);
    drop(first);

    let channel = Arc::new(RecordingChannel::new());
    let second = Rig::with_journal(feed, channel.clone(), journal.clone()).await;
    second.poller.run_cycle().await;
    second.poller.run_cycle().await;

    assert_eq!(channel.messages().len(), 1);
    assert_eq!(journal.lines().len(), 1);
}

#[tokio::test]
async fn audio_failure_degrades_to_text_and_records() {
    let feed = Arc::new(ScriptedFeed::new());
    feed.push(Ok(vec![tornado()]));
    feed.set_audio(Err(AudioError::Status(404)));
    let rig = Rig::new(feed, Arc::new(RecordingChannel::new())).await;

    let report = rig.poller.run_cycle().await;
    assert_eq!(report.delivered_without_audio, 1);
    assert_eq!(report.delivered, 0);
    assert_eq!(rig.channel.messages().len(), 1);
    assert_eq!(rig.channel.files(), 0);
    assert_eq!(rig.journal.lines().len(), 1);
    assert_eq!(rig.reporter.snapshot().delivered_without_audio, 1);
}

#[tokio::test]
async fn upload_failure_also_degrades_to_text() {
    let feed = Arc::new(ScriptedFeed::new());
    feed.push(Ok(vec![tornado()]));
    let channel = Arc::new(RecordingChannel::new());
    channel.fail_files(1, ChannelError::permanent("Discord HTTP 413: too large"));
    let rig = Rig::new(feed, channel).await;

    let report = rig.poller.run_cycle().await;
    assert_eq!(report.delivered_without_audio, 1);
    assert_eq!(rig.journal.lines().len(), 1);
}

#[tokio::test]
async fn repeats_within_one_batch_deliver_once() {
    let feed = Arc::new(ScriptedFeed::new());
    feed.push(Ok(vec![tornado(), flood(), tornado()]));
    let rig = Rig::new(feed, Arc::new(RecordingChannel::new())).await;

    let report = rig.poller.run_cycle().await;
    assert_eq!(report.fetched, 3);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.posted(), 2);
    assert_eq!(
        rig.channel.messages(),
        vec![
            "📢 Alert: TornadoWarning 📢",
            "📢 Alert: FlashFloodWarning 📢"
        ]
    );
    assert_eq!(rig.journal.lines().len(), 2);
}

#[tokio::test]
async fn fetch_error_skips_cycle_without_touching_store() {
    let feed = Arc::new(ScriptedFeed::new());
    feed.push(Err(FetchError::Status {
        status: 502,
        body: "bad gateway".into(),
    }));
    let rig = Rig::new(feed.clone(), Arc::new(RecordingChannel::new())).await;

    let report = rig.poller.run_cycle().await;
    assert!(report.fetch_failed);
    assert!(rig.channel.sent().is_empty());
    assert!(rig.store.is_empty().await);
    assert_eq!(rig.reporter.snapshot().fetch_failed, 1);

    // Feed recovers on the next cycle.
    feed.push(Ok(vec![flood()]));
    let report = rig.poller.run_cycle().await;
    assert_eq!(report.delivered, 1);
}

#[tokio::test]
async fn permanent_send_failure_is_not_recorded_and_retried_next_cycle() {
    let feed = Arc::new(ScriptedFeed::new());
    feed.push(Ok(vec![flood()]));
    let channel = Arc::new(RecordingChannel::new());
    channel.fail_messages(1, ChannelError::permanent("Discord HTTP 403: Missing Access"));
    let rig = Rig::new(feed, channel.clone()).await;

    let report = rig.poller.run_cycle().await;
    assert_eq!(report.failed, 1);
    assert_eq!(channel.message_attempts(), 1, "permanent errors are not retried");
    assert!(rig.store.is_empty().await);
    assert_eq!(rig.reporter.snapshot().delivery_failed, 1);

    let report = rig.poller.run_cycle().await;
    assert_eq!(report.delivered, 1);
    assert_eq!(rig.journal.lines().len(), 1);
}

#[tokio::test]
async fn transient_send_failures_are_retried_within_the_cycle() {
    let feed = Arc::new(ScriptedFeed::new());
    feed.push(Ok(vec![flood()]));
    let channel = Arc::new(RecordingChannel::new());
    channel.fail_messages(2, ChannelError::transient("Discord HTTP 503"));
    let rig = Rig::new(feed, channel.clone()).await;

    let report = rig.poller.run_cycle().await;
    assert_eq!(report.delivered, 1);
    assert_eq!(channel.message_attempts(), 3);
    assert_eq!(channel.messages().len(), 1);
}

#[tokio::test]
async fn retry_budget_exhausted_leaves_alert_eligible() {
    let feed = Arc::new(ScriptedFeed::new());
    feed.push(Ok(vec![flood()]));
    let channel = Arc::new(RecordingChannel::new());
    channel.fail_messages(3, ChannelError::transient("Discord HTTP 429"));
    let rig = Rig::new(feed, channel.clone()).await;

    let report = rig.poller.run_cycle().await;
    assert_eq!(report.failed, 1);
    assert!(rig.store.is_empty().await);

    rig.poller.run_cycle().await;
    assert_eq!(channel.messages().len(), 1);
    assert_eq!(rig.store.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn loop_sleeps_between_cycles_and_stops_on_shutdown() {
    let feed = Arc::new(ScriptedFeed::new());
    feed.push(Ok(vec![tornado()]));
    let rig = Arc::new(Rig::new(feed.clone(), Arc::new(RecordingChannel::new())).await);

    let (stop_tx, stop_rx) = watch::channel(false);
    let runner = {
        let rig = rig.clone();
        tokio::spawn(async move { rig.poller.run(stop_rx).await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(feed.fetches(), 1);
    assert_eq!(rig.poller.state(), PollState::Sleeping);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(feed.fetches(), 2);

    stop_tx.send(true).unwrap();
    runner.await.unwrap();
    assert_eq!(rig.poller.state(), PollState::Idle);
    assert_eq!(rig.channel.messages().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn manual_trigger_wakes_the_loop_early() {
    let feed = Arc::new(ScriptedFeed::new());
    let rig = Arc::new(Rig::new(feed.clone(), Arc::new(RecordingChannel::new())).await);

    let (stop_tx, stop_rx) = watch::channel(false);
    let runner = {
        let rig = rig.clone();
        tokio::spawn(async move { rig.poller.run(stop_rx).await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(feed.fetches(), 1);

    rig.poller.trigger().notify_one();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(feed.fetches(), 2);

    stop_tx.send(true).unwrap();
    runner.await.unwrap();
}

#[tokio::test]
async fn shutdown_during_delivery_lets_send_and_record_finish() {
    let feed = Arc::new(ScriptedFeed::new());
    feed.push(Ok(vec![flood()]));
    let channel = Arc::new(RecordingChannel::new());
    let gate = channel.hold_next_message();
    let rig = Arc::new(Rig::new(feed.clone(), channel.clone()).await);

    let (stop_tx, stop_rx) = watch::channel(false);
    let runner = {
        let rig = rig.clone();
        tokio::spawn(async move { rig.poller.run(stop_rx).await })
    };

    tokio::time::timeout(Duration::from_secs(5), gate.entered.notified())
        .await
        .expect("send started");
    assert_eq!(rig.poller.state(), PollState::Delivering);

    stop_tx.send(true).unwrap();
    gate.release.notify_one();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("loop stopped")
        .unwrap();

    assert_eq!(channel.messages().len(), 1);
    assert_eq!(rig.journal.lines(), vec![identity(&flood()).to_string()]);
    assert_eq!(rig.poller.state(), PollState::Idle);
    assert_eq!(feed.fetches(), 1);
}
