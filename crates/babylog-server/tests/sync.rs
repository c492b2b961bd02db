mod common;

use babylog_core::{ClientFrame, EntryAction, EntryMutation, Entry, EntryId, FamilyId, ServerFrame, Timestamp};
use common::TestServer;

fn local_entry(family_id: FamilyId, value: &str) -> Entry {
    Entry::new_local(family_id, Timestamp::now(), "feed".to_string(), value.to_string())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn fresh_client_receives_init_with_existing_state() {
    let server = TestServer::start().await;
    let family = server.create_family("The Smiths").await;
    let token = server.issue_token(family.id).await;

    let mut first = server.connect(token).await;
    first
        .send(&ClientFrame::Entry {
            mutation: EntryMutation::add_or_update(local_entry(family.id, "bottle")),
        })
        .await;
    let ServerFrame::EntryAck { .. } = first.recv().await else {
        panic!("expected entry_ack");
    };

    // A second device joining later gets the existing entry in its init frame.
    let token2 = server.issue_token(family.id).await;
    let mut second = server.connect(token2).await;
    match second.recv().await {
        ServerFrame::Init { entries, .. } => {
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].value, "bottle");
        }
        other => panic!("expected init frame, got {other:?}"),
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn offline_write_then_reconnect_syncs_from_cursor() {
    let server = TestServer::start().await;
    let family = server.create_family("The Garcias").await;
    let token = server.issue_token(family.id).await;

    let mut writer = server.connect(token).await;
    let _init = writer.recv().await;

    writer
        .send(&ClientFrame::Entry {
            mutation: EntryMutation::add_or_update(local_entry(family.id, "nap")),
        })
        .await;
    let ServerFrame::EntryAck { seq, .. } = writer.recv().await else {
        panic!("expected entry_ack");
    };
    assert_eq!(seq, 1);

    // A client that was offline reconnects and catches up from cursor 0.
    let token2 = server.issue_token(family.id).await;
    let mut catching_up = server.connect(token2).await;
    let _init = catching_up.recv().await;

    catching_up
        .send(&ClientFrame::SyncRequest {
            cursor: 0,
            limit: None,
            entries: vec![],
        })
        .await;
    match catching_up.recv().await {
        ServerFrame::SyncResponse {
            entries, has_more, ..
        } => {
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].value, "nap");
            assert!(!has_more);
        }
        other => panic!("expected sync_response, got {other:?}"),
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn mutation_broadcasts_to_other_session_excluding_submitter() {
    let server = TestServer::start().await;
    let family = server.create_family("The Okafors").await;
    let token_a = server.issue_token(family.id).await;
    let token_b = server.issue_token(family.id).await;

    let mut a = server.connect(token_a).await;
    let _init_a = a.recv().await;
    let mut b = server.connect(token_b).await;
    let _init_b = b.recv().await;

    a.send(&ClientFrame::Entry {
        mutation: EntryMutation::add_or_update(local_entry(family.id, "tummy time")),
    })
    .await;

    // The submitter gets its ack first...
    let ServerFrame::EntryAck { seq, .. } = a.recv().await else {
        panic!("expected entry_ack on submitter");
    };
    assert_eq!(seq, 1);

    // ...and the peer gets the broadcast, never the submitter.
    match b.recv().await {
        ServerFrame::Entry {
            action,
            entry: Some(entry),
            seq: Some(seq),
            ..
        } => {
            assert_eq!(action, EntryAction::Add);
            assert_eq!(entry.value, "tummy time");
            assert_eq!(seq, 1);
        }
        other => panic!("expected entry broadcast, got {other:?}"),
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn delete_propagates_as_tombstone_to_peers() {
    let server = TestServer::start().await;
    let family = server.create_family("The Nguyens").await;
    let token_a = server.issue_token(family.id).await;
    let token_b = server.issue_token(family.id).await;

    let mut a = server.connect(token_a).await;
    let _init_a = a.recv().await;
    let mut b = server.connect(token_b).await;
    let _init_b = b.recv().await;

    let entry_id = EntryId::new();
    let mut entry = local_entry(family.id, "diaper");
    entry.id = entry_id;
    a.send(&ClientFrame::Entry {
        mutation: EntryMutation::add_or_update(entry),
    })
    .await;
    let _ack = a.recv().await;
    let _broadcast = b.recv().await;

    a.send(&ClientFrame::Entry {
        mutation: EntryMutation {
            action: EntryAction::Delete,
            entry: None,
            id: Some(entry_id),
        },
    })
    .await;
    let ServerFrame::EntryAck { id, seq } = a.recv().await else {
        panic!("expected entry_ack for delete");
    };
    assert_eq!(id, entry_id);
    assert_eq!(seq, 2);

    match b.recv().await {
        ServerFrame::Entry {
            action: EntryAction::Delete,
            entry: None,
            id: Some(id),
            seq: Some(seq),
        } => {
            assert_eq!(id, entry_id);
            assert_eq!(seq, 2);
        }
        other => panic!("expected delete broadcast, got {other:?}"),
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn sync_request_paginates_with_has_more() {
    let server = TestServer::start().await;
    let family = server.create_family("The Patels").await;
    let token = server.issue_token(family.id).await;

    let mut writer = server.connect(token).await;
    let _init = writer.recv().await;

    for i in 0..5 {
        writer
            .send(&ClientFrame::Entry {
                mutation: EntryMutation::add_or_update(local_entry(family.id, &format!("entry-{i}"))),
            })
            .await;
        let _ack = writer.recv().await;
    }

    let token2 = server.issue_token(family.id).await;
    let mut reader = server.connect(token2).await;
    let _init = reader.recv().await;

    reader
        .send(&ClientFrame::SyncRequest {
            cursor: 0,
            limit: Some(2),
            entries: vec![],
        })
        .await;
    let ServerFrame::SyncResponse {
        entries,
        cursor,
        has_more,
    } = reader.recv().await
    else {
        panic!("expected sync_response");
    };
    assert_eq!(entries.len(), 2);
    assert!(has_more);
    assert_eq!(cursor, 2);

    reader
        .send(&ClientFrame::SyncRequest {
            cursor,
            limit: Some(10),
            entries: vec![],
        })
        .await;
    let ServerFrame::SyncResponse {
        entries, has_more, ..
    } = reader.recv().await
    else {
        panic!("expected sync_response");
    };
    assert_eq!(entries.len(), 3);
    assert!(!has_more);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn revoked_token_is_rejected_on_new_connection() {
    let server = TestServer::start().await;
    let family = server.create_family("The Haddads").await;
    let token = server.issue_token(family.id).await;

    server.revoke_token(token).await;

    assert!(
        server.try_connect(token).await.is_err(),
        "a revoked token should fail the websocket handshake"
    );
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn late_joiner_catch_up_sees_every_prior_mutation() {
    let server = TestServer::start().await;
    let family = server.create_family("The Alaoui-Bens").await;
    let token = server.issue_token(family.id).await;

    let mut writer = server.connect(token).await;
    let _init = writer.recv().await;

    for i in 0..3 {
        writer
            .send(&ClientFrame::Entry {
                mutation: EntryMutation::add_or_update(local_entry(family.id, &format!("mutation-{i}"))),
            })
            .await;
        let _ack = writer.recv().await;
    }

    // A session that only joins after the mutations above have already
    // happened (standing in for one that missed live broadcasts entirely)
    // still recovers full history via a cursor-0 catch-up request.
    let token2 = server.issue_token(family.id).await;
    let mut late = server.connect(token2).await;
    let ServerFrame::Init { entries, .. } = late.recv().await else {
        panic!("expected init frame");
    };
    assert_eq!(entries.len(), 3);

    late.send(&ClientFrame::SyncRequest {
        cursor: 0,
        limit: None,
        entries: vec![],
    })
    .await;
    let ServerFrame::SyncResponse {
        entries, has_more, ..
    } = late.recv().await
    else {
        panic!("expected sync_response");
    };
    assert_eq!(entries.len(), 3);
    assert!(!has_more);
}
