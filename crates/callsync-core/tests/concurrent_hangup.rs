//! Hangups racing from the UI, the transport and the call authority

mod common;

use callsync_core::*;
use common::*;
use tokio_test::assert_ok;

const ROUNDS: usize = 25;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_enders_disconnect_once() {
    for round in 0..ROUNDS {
        let mut h = Harness::logged_in().await;
        let call_id = h.connected_outgoing("+15551234567").await;

        let ui = {
            let orchestrator = h.orchestrator.clone();
            let call_id = call_id.clone();
            tokio::spawn(async move { orchestrator.end_call(Some(call_id)).await })
        };
        let transport = {
            let orchestrator = h.orchestrator.clone();
            let call_id = call_id.clone();
            tokio::spawn(async move {
                orchestrator
                    .handle_transport_event(TransportEvent::Disconnected {
                        call_id,
                        error: None,
                    })
                    .await
            })
        };
        let authority = {
            let orchestrator = h.orchestrator.clone();
            let call_id = call_id.clone();
            tokio::spawn(async move {
                orchestrator
                    .handle_authority_action(AuthorityAction::End { call_id })
                    .await
            })
        };

        let (ui, transport, authority) = tokio::join!(ui, transport, authority);
        assert_ok!(assert_ok!(ui));
        assert_ok!(transport);
        assert_ok!(authority);

        let events = h.take_events();
        assert_eq!(
            names(&events),
            vec!["callDisconnected"],
            "round {round}: {events:?}"
        );

        let endings: Vec<_> = h
            .authority
            .outcomes_for(&call_id)
            .into_iter()
            .filter(|outcome| *outcome != CallOutcome::Connected)
            .collect();
        assert_eq!(endings.len(), 1, "round {round}: {endings:?}");

        assert_eq!(h.orchestrator.registry().live_count(), 0);
        assert!(h.orchestrator.registry().intent(&call_id).is_none());
        assert!(!h.orchestrator.get_call_status().has_active_call);
    }
}
