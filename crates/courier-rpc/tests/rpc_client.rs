//! End-to-end RPC behavior over the in-memory broker: correlation under
//! concurrency, timeout hygiene, and connection-loss handling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use courier_rpc::{Delivery, Envelope, MemoryBroker, RpcClient, RpcError, RpcOutcome};
use serde_json::json;

fn client_with_timeout(broker: &MemoryBroker, timeout: Duration) -> RpcClient {
    RpcClient::new(Arc::new(broker.clone())).with_default_timeout(timeout)
}

#[tokio::test]
async fn echo_round_trip() {
    let broker = MemoryBroker::new();
    broker.bind_echo("rpc_echo");
    let client = client_with_timeout(&broker, Duration::from_secs(1));

    let response = client
        .call("rpc_echo", &json!({"action": "ping", "seq": 1}))
        .await
        .unwrap();
    assert_eq!(
        response.outcome,
        RpcOutcome::Success(json!({"action": "ping", "seq": 1}))
    );
}

#[tokio::test]
async fn thirty_two_concurrent_calls_each_get_their_own_reply() {
    let broker = MemoryBroker::new();
    // Reply with the request's sequence number after a stagger that
    // reorders completions relative to submission.
    broker.bind(
        "rpc_seq",
        Arc::new(|envelope: Envelope| {
            Box::pin(async move {
                let request = envelope.body_json().ok()?;
                let seq = request["seq"].as_u64()?;
                tokio::time::sleep(Duration::from_millis((seq % 7) * 5)).await;
                serde_json::to_vec(&json!({"success": true, "response": {"seq": seq}})).ok()
            })
        }),
    );
    let client = Arc::new(client_with_timeout(&broker, Duration::from_secs(2)));

    let mut handles = Vec::new();
    for seq in 0..32u64 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            let response = client.call("rpc_seq", &json!({"seq": seq})).await.unwrap();
            (seq, response)
        }));
    }
    for handle in handles {
        let (seq, response) = handle.await.unwrap();
        assert_eq!(
            response.success_value().unwrap()["seq"],
            seq,
            "reply crossed between concurrent calls"
        );
    }
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn timeout_fires_near_the_deadline_and_cleans_up() {
    let broker = MemoryBroker::new();
    let client = client_with_timeout(&broker, Duration::from_millis(100));

    let started = Instant::now();
    let err = client.call("rpc_silent", &json!({})).await.unwrap_err();
    let elapsed = started.elapsed();

    assert_matches!(err, RpcError::Timeout { ref destination, .. } if destination == "rpc_silent");
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(2), "timeout fired far too late");
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn late_reply_after_timeout_is_discarded() {
    let broker = MemoryBroker::new();
    broker.bind(
        "rpc_slow",
        Arc::new(|_: Envelope| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                serde_json::to_vec(&json!({"success": true})).ok()
            })
        }),
    );
    broker.bind_echo("rpc_echo");
    let client = client_with_timeout(&broker, Duration::from_millis(50));

    let err = client.call("rpc_slow", &json!({})).await.unwrap_err();
    assert_matches!(err, RpcError::Timeout { .. });

    // Let the slow reply land; the router must swallow it silently.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(client.in_flight(), 0);

    let response = client
        .call_with_timeout("rpc_echo", &json!({"ok": 1}), Duration::from_secs(1))
        .await
        .unwrap();
    assert!(response.is_success());
}

#[tokio::test]
async fn duplicate_reply_is_discarded() {
    let broker = MemoryBroker::new();
    broker.bind_echo("rpc_echo");
    let client = client_with_timeout(&broker, Duration::from_secs(1));

    let _ = client.call("rpc_echo", &json!({"n": 1})).await.unwrap();
    let token = broker.published()[0].correlation_id.clone();

    // Replay the token with a different body.
    broker
        .inject(Delivery {
            correlation_id: Some(token.into_inner()),
            body: br#"{"success": false, "error": "replay"}"#.to_vec(),
        })
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let response = client.call("rpc_echo", &json!({"n": 2})).await.unwrap();
    assert_eq!(response.success_value().unwrap()["n"], 2);
}

#[tokio::test]
async fn foreign_and_tokenless_replies_do_not_disturb_calls() {
    let broker = MemoryBroker::new();
    broker.bind(
        "rpc_noisy",
        Arc::new(|envelope: Envelope| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let request = envelope.body_json().ok()?;
                serde_json::to_vec(&json!({"success": true, "response": request})).ok()
            })
        }),
    );
    let client = client_with_timeout(&broker, Duration::from_secs(1));

    let call = tokio::spawn({
        let broker = broker.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            broker
                .inject(Delivery {
                    correlation_id: None,
                    body: b"noise".to_vec(),
                })
                .await;
            broker
                .inject(Delivery {
                    correlation_id: Some("someone-elses-token".to_owned()),
                    body: br#"{"success": true}"#.to_vec(),
                })
                .await;
        }
    });

    let response = client.call("rpc_noisy", &json!({"n": 9})).await.unwrap();
    assert_eq!(response.success_value().unwrap()["n"], 9);
    call.await.unwrap();
}

#[tokio::test]
async fn malformed_reply_fails_only_its_own_call() {
    let broker = MemoryBroker::new();
    broker.bind(
        "rpc_garbled",
        Arc::new(|_: Envelope| Box::pin(async move { Some(b"}{ not json".to_vec()) })),
    );
    broker.bind_echo("rpc_echo");
    let client = Arc::new(client_with_timeout(&broker, Duration::from_secs(1)));

    let healthy = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.call("rpc_echo", &json!({"ok": true})).await }
    });

    let err = client.call("rpc_garbled", &json!({})).await.unwrap_err();
    assert_matches!(err, RpcError::Protocol(_));

    let response = healthy.await.unwrap().unwrap();
    assert!(response.is_success());
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn connection_loss_fails_in_flight_calls_before_their_deadline() {
    let broker = MemoryBroker::new();
    let client = Arc::new(client_with_timeout(&broker, Duration::from_secs(30)));

    let mut waiting = Vec::new();
    for _ in 0..4 {
        let client = Arc::clone(&client);
        waiting.push(tokio::spawn(async move {
            client.call("rpc_never_answers", &json!({})).await
        }));
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.in_flight(), 4);

    let started = Instant::now();
    broker.drop_connections();
    for handle in waiting {
        let err = handle.await.unwrap().unwrap_err();
        assert_matches!(err, RpcError::Connection(_));
    }
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn client_reconnects_lazily_after_connection_loss() {
    let broker = MemoryBroker::new();
    broker.bind_echo("rpc_echo");
    let client = client_with_timeout(&broker, Duration::from_secs(1));

    let first = client.call("rpc_echo", &json!({"n": 1})).await.unwrap();
    assert!(first.is_success());
    let first_queue = broker.published()[0].reply_to.clone();

    broker.drop_connections();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = client.call("rpc_echo", &json!({"n": 2})).await.unwrap();
    assert!(second.is_success());
    let second_queue = broker.published()[1].reply_to.clone();
    assert_ne!(first_queue, second_queue, "reconnect must declare a fresh reply queue");
}

#[tokio::test]
async fn reply_racing_the_deadline_yields_exactly_one_outcome() {
    let broker = MemoryBroker::new();
    broker.bind(
        "rpc_knife_edge",
        Arc::new(|_: Envelope| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                serde_json::to_vec(&json!({"success": true})).ok()
            })
        }),
    );
    let client = client_with_timeout(&broker, Duration::from_millis(50));

    // Either side may win; the call must resolve exactly once and leave
    // the table clean.
    match client.call("rpc_knife_edge", &json!({})).await {
        Ok(response) => assert!(response.is_success()),
        Err(err) => assert_matches!(err, RpcError::Timeout { .. }),
    }
    assert_eq!(client.in_flight(), 0);
}
