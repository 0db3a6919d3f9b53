//! End-to-end listener scenarios against the in-memory queue fake.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use queue_trigger::{
    DefaultMessageProcessor, ListenerConfig, ListenerError, QueueClientError, QueueListener,
};

use super::common::{
    wait_for, FakeQueueAccount, FakeQueueClient, RecordingPoisonSink, ScriptedHandler,
};

fn test_config() -> ListenerConfig {
    ListenerConfig {
        batch_size: 4,
        max_dequeue_count: 3,
        ..Default::default()
    }
}

fn build_listener(
    client: &Arc<FakeQueueClient>,
    handler: &Arc<ScriptedHandler>,
    config: ListenerConfig,
) -> (QueueListener, Arc<RecordingPoisonSink>) {
    let poison_sink = RecordingPoisonSink::new();
    let processor = Arc::new(
        DefaultMessageProcessor::new(client.clone(), "orders", &config)
            .with_poison_sink(poison_sink.clone()),
    );
    let listener = QueueListener::new(
        "process-orders",
        "orders",
        client.clone(),
        processor,
        handler.clone(),
        config,
    );
    (listener, poison_sink)
}

#[tokio::test]
async fn test_notify_short_circuits_backoff_wait() {
    let account = FakeQueueAccount::new();
    let client = FakeQueueClient::new(&account, "orders");
    let handler = ScriptedHandler::succeeding();
    let (mut listener, _) = build_listener(&client, &handler, test_config());

    listener.start().expect("start");

    // First poll comes back empty and the loop settles into a backoff wait
    // of at least the 100ms polling minimum.
    let polled = {
        let client = client.clone();
        wait_for(move || client.poll_count() >= 1, Duration::from_secs(1)).await
    };
    assert!(polled, "first poll never happened");
    let polls_before = client.poll_count();

    listener.notify().expect("notify");

    // The wake must cut the backoff short: the next poll begins well before
    // the minimum delay could have elapsed on its own.
    let woke = {
        let client = client.clone();
        wait_for(
            move || client.poll_count() > polls_before,
            Duration::from_millis(60),
        )
        .await
    };
    assert!(woke, "notify did not short-circuit the backoff wait");

    listener.stop(CancellationToken::new()).await.expect("stop");

    // After stop returns, no further queue calls are made.
    let polls_after_stop = client.poll_count();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(client.poll_count(), polls_after_stop);
}

#[tokio::test(start_paused = true)]
async fn test_batch_of_successes_deletes_without_renewals() {
    let account = FakeQueueAccount::new();
    for i in 0..3 {
        account.seed("orders", &format!(r#"{{"order":{i}}}"#));
    }
    let client = FakeQueueClient::new(&account, "orders");
    let handler = ScriptedHandler::new(Duration::from_millis(50), true);
    let (mut listener, _) = build_listener(&client, &handler, test_config());

    listener.start().expect("start");
    tokio::time::sleep(Duration::from_secs(10)).await;
    listener.stop(CancellationToken::new()).await.expect("stop");

    assert_eq!(handler.invocation_count(), 3);
    assert_eq!(client.delete_count(), 3);
    // Handlers finished long before the half-visibility mark.
    assert_eq!(client.extension_count(), 0);
    assert_eq!(account.queue_len("orders"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_long_handler_gets_visibility_renewals() {
    let account = FakeQueueAccount::new();
    account.seed("orders", r#"{"order":1}"#);
    let client = FakeQueueClient::new(&account, "orders");
    // 14 minutes of work against a 10 minute visibility window.
    let handler = ScriptedHandler::new(Duration::from_secs(840), true);
    let (mut listener, _) = build_listener(&client, &handler, test_config());

    listener.start().expect("start");
    tokio::time::sleep(Duration::from_secs(900)).await;
    listener.stop(CancellationToken::new()).await.expect("stop");

    // Extensions at the 5 and 10 minute marks kept the message invisible,
    // so it was never redelivered.
    assert!(
        client.extension_count() >= 2,
        "expected at least two visibility extensions, saw {}",
        client.extension_count()
    );
    assert_eq!(handler.invocation_count(), 1);
    assert_eq!(client.delete_count(), 1);
    assert_eq!(account.queue_len("orders"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_move_message_to_poison_queue() {
    let account = FakeQueueAccount::new();
    account.seed("orders", r#"{"order":7}"#);
    let client = FakeQueueClient::new(&account, "orders");
    let handler = ScriptedHandler::failing();
    let (mut listener, poison_sink) = build_listener(&client, &handler, test_config());

    listener.start().expect("start");
    let poisoned = {
        let account = account.clone();
        wait_for(
            move || account.queue_len("orders-poison") == 1,
            Duration::from_secs(60),
        )
        .await
    };
    listener.stop(CancellationToken::new()).await.expect("stop");

    assert!(poisoned, "message never reached the poison queue");
    // Three deliveries: two releases for retry, then the poison copy plus
    // delete of the original.
    assert_eq!(handler.invocation_count(), 3);
    assert_eq!(client.release_count(), 2);
    assert_eq!(client.delete_count(), 1);
    assert_eq!(account.queue_len("orders"), 0);

    let events = poison_sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "orders-poison");
}

#[tokio::test(start_paused = true)]
async fn test_queue_disappearing_mid_run_is_not_fatal() {
    let account = FakeQueueAccount::new();
    account.seed("orders", r#"{"order":1}"#);
    let client = FakeQueueClient::new(&account, "orders");
    let handler = ScriptedHandler::succeeding();
    let (mut listener, _) = build_listener(&client, &handler, test_config());

    listener.start().expect("start");
    let first_processed = {
        let client = client.clone();
        wait_for(move || client.delete_count() == 1, Duration::from_secs(30)).await
    };
    assert!(first_processed);

    // The queue vanishes: the in-flight fetch errors, and subsequent cycles
    // must re-probe existence instead of fetching.
    let probes_before = client.exists_probe_count();
    client.fail_next_get(QueueClientError::NotFound("orders".to_string()));
    client.set_exists(false);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(
        client.exists_probe_count() > probes_before,
        "existence was never re-probed after the storage error"
    );

    // The queue comes back; processing resumes without a restart.
    client.set_exists(true);
    account.seed("orders", r#"{"order":2}"#);
    let recovered = {
        let client = client.clone();
        wait_for(move || client.delete_count() == 2, Duration::from_secs(180)).await
    };
    assert!(recovered, "listener did not resume after the queue returned");

    listener.stop(CancellationToken::new()).await.expect("stop");
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_dispatches_stay_within_threshold_plus_batch() {
    let account = FakeQueueAccount::new();
    for i in 0..8 {
        account.seed("orders", &format!(r#"{{"order":{i}}}"#));
    }
    let client = FakeQueueClient::new(&account, "orders");
    let handler = ScriptedHandler::new(Duration::from_secs(10), true);
    let config = ListenerConfig {
        batch_size: 2,
        new_batch_threshold: Some(1),
        ..Default::default()
    };
    let (mut listener, _) = build_listener(&client, &handler, config);

    listener.start().expect("start");
    tokio::time::sleep(Duration::from_secs(120)).await;
    listener.stop(CancellationToken::new()).await.expect("stop");

    assert_eq!(handler.invocation_count(), 8);
    assert_eq!(client.delete_count(), 8);
    assert!(
        handler.peak_concurrency() <= 3,
        "saw {} concurrent dispatches, cap is new_batch_threshold + batch_size = 3",
        handler.peak_concurrency()
    );
}

#[tokio::test(start_paused = true)]
async fn test_non_transient_storage_error_faults_the_listener() {
    let account = FakeQueueAccount::new();
    let client = FakeQueueClient::new(&account, "orders");
    client.fail_next_get(QueueClientError::Other("authorization denied".to_string()));
    let handler = ScriptedHandler::succeeding();
    let (mut listener, _) = build_listener(&client, &handler, test_config());

    listener.start().expect("start");
    tokio::time::sleep(Duration::from_secs(1)).await;

    let stopped = listener.stop(CancellationToken::new()).await;
    assert!(matches!(stopped, Err(ListenerError::Storage(_))));
}

#[tokio::test(start_paused = true)]
async fn test_hard_cancelled_stop_aborts_message_finalization() {
    let account = FakeQueueAccount::new();
    account.seed("orders", r#"{"order":1}"#);
    let client = FakeQueueClient::new(&account, "orders");
    let handler = ScriptedHandler::new(Duration::from_secs(1000), true);
    let (mut listener, _) = build_listener(&client, &handler, test_config());

    listener.start().expect("start");
    let started = {
        let handler = handler.clone();
        wait_for(move || handler.invocation_count() == 1, Duration::from_secs(30)).await
    };
    assert!(started);

    // Stop with an already-fired external cancel: the drain still waits for
    // the handler, but completion runs under a cancelled graceful scope and
    // must abort instead of deleting.
    let external = CancellationToken::new();
    external.cancel();
    listener.stop(external).await.expect("stop");

    assert_eq!(client.delete_count(), 0);
    assert_eq!(account.queue_len("orders"), 1);
}
