//! Session tests against an in-memory server
//!
//! Each test scripts the server side of the conversation and checks the
//! requests the client sends and the results it reports.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cubesql::constants::{client_flags, selector, Command};
use cubesql::{BindType, BindValue, Encryption, Error, SessionState};

use common::{config, connect, cursor_frame};

mod login_tests {
    use super::*;

    #[tokio::test]
    async fn test_clear_login() {
        let (session, server) = connect(config(), |mut server| async move {
            server.accept_clear().await;
        })
        .await;
        server.await.unwrap();

        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.is_closed());
        assert!(!session.last_error().is_error());
    }

    #[tokio::test]
    async fn test_login_selects_database() {
        let config = config().database("sales");
        let (session, server) = connect(config, |mut server| async move {
            server.accept_clear().await;
            server.expect_sql(Command::Execute, "USE DATABASE 'sales';").await;
            server.ok().await;
        })
        .await;
        server.await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_aes_login_seals_requests() {
        let config = config().encryption(Encryption::Aes256);
        let (session, server) = connect(config, |mut server| async move {
            server.accept_encrypted(Encryption::Aes256).await;
            let ping = server.expect_sql(Command::Execute, "PING;").await;
            assert_eq!(ping.header.encrypted_packet, Encryption::Aes256 as u8);
            server.ok().await;
        })
        .await;

        session.ping().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_login_with_token() {
        let config = config().token("tk-42");
        let (session, server) = connect(config, |mut server| async move {
            server.accept_clear_token("tk-42").await;
        })
        .await;
        server.await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_encrypted_login_with_token() {
        let config = config().encryption(Encryption::Aes192).token("tk-42");
        let (session, server) = connect(config, |mut server| async move {
            server
                .accept_encrypted_token(Encryption::Aes192, "tk-42")
                .await;
            server.expect_sql(Command::Execute, "PING;").await;
            server.ok().await;
        })
        .await;

        session.ping().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_login_refused() {
        let (client, server) = tokio::io::duplex(1 << 16);
        let task = tokio::spawn(async move {
            let mut server = common::MockServer::new(server);
            server.expect(Command::Connect, selector::CLEAR_CONNECT_PHASE1).await;
            server.fail(13, "unknown user").await;
        });

        let result = cubesql::Session::connect_with_transport(
            config(),
            Box::new(cubesql::StreamTransport::new(client)),
        )
        .await;
        task.await.unwrap();

        match result {
            Err(Error::Authentication { code, message }) => {
                assert_eq!(code, 13);
                assert_eq!(message, "unknown user");
            }
            other => panic!("expected an authentication error, got {:?}", other),
        }
    }
}

mod execute_tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_reads_changes() {
        let (session, server) = connect(config(), |mut server| async move {
            server.accept_clear().await;
            server
                .expect_sql(Command::Execute, "CREATE TABLE t (id INTEGER);")
                .await;
            server.ok().await;
            server.changes(0).await;

            server
                .expect_sql(Command::Execute, "INSERT INTO t VALUES (1);")
                .await;
            server.ok().await;
            server.changes(1).await;
        })
        .await;

        assert_eq!(session.execute("CREATE TABLE t (id INTEGER);").await.unwrap(), 0);
        assert_eq!(session.execute("INSERT INTO t VALUES (1);").await.unwrap(), 1);
        assert_eq!(session.last_affected_rows(), 1);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_without_changes_query() {
        let config = config().fetch_changes(false);
        let (session, server) = connect(config, |mut server| async move {
            server.accept_clear().await;
            server.expect_sql(Command::Execute, "DELETE FROM t;").await;
            server.ok().await;
        })
        .await;

        assert_eq!(session.execute("DELETE FROM t;").await.unwrap(), 0);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_keeps_session() {
        let (session, server) = connect(config(), |mut server| async move {
            server.accept_clear().await;
            server.expect_sql(Command::Execute, "DROP TABLE nope;").await;
            server.fail(1, "no such table: nope").await;
            server.expect_sql(Command::Execute, "PING;").await;
            server.ok().await;
        })
        .await;

        let err = session.execute("DROP TABLE nope;").await.unwrap_err();
        assert!(matches!(err, Error::Server { code: 1, .. }));
        let state = session.last_error();
        assert_eq!(state.code, 1);
        assert!(state.message.contains("no such table"));
        assert_eq!(session.state(), SessionState::Idle);

        session.ping().await.unwrap();
        assert!(!session.last_error().is_error());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_set_database_not_found() {
        let (session, server) = connect(config(), |mut server| async move {
            server.accept_clear().await;
            server
                .expect_sql(Command::Execute, "USE DATABASE 'o''brien';")
                .await;
            server.fail(22, "database not found").await;
            server
                .expect_sql(Command::Execute, "UNSET CURRENT DATABASE;")
                .await;
            server.ok().await;
        })
        .await;

        let err = session.set_database(Some("o'brien")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { code: 22, .. }));
        assert_eq!(session.last_error().code, 22);
        session.set_database(None).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_transactions() {
        let (session, server) = connect(config(), |mut server| async move {
            server.accept_clear().await;
            for sql in ["BEGIN TRANSACTION;", "COMMIT;", "BEGIN TRANSACTION;", "ROLLBACK;"] {
                server.expect_sql(Command::Execute, sql).await;
                server.ok().await;
            }
        })
        .await;

        session.begin_transaction().await.unwrap();
        assert!(session.in_transaction());
        session.commit_transaction().await.unwrap();
        assert!(!session.in_transaction());
        session.begin_transaction().await.unwrap();
        session.rollback_transaction().await.unwrap();
        assert!(!session.in_transaction());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_commit_keeps_transaction() {
        let (session, server) = connect(config(), |mut server| async move {
            server.accept_clear().await;
            server.expect_sql(Command::Execute, "BEGIN TRANSACTION;").await;
            server.ok().await;
            server.expect_sql(Command::Execute, "COMMIT;").await;
            server.fail(19, "constraint failed").await;
            server.expect_sql(Command::Execute, "ROLLBACK;").await;
            server.ok().await;
        })
        .await;

        session.begin_transaction().await.unwrap();
        match session.commit_transaction().await {
            Err(Error::Server { code, message }) => {
                assert_eq!(code, 19);
                assert_eq!(message, "constraint failed");
            }
            other => panic!("expected a server error, got {:?}", other),
        }
        assert!(session.in_transaction());
        assert_eq!(session.last_error().code, 19);
        assert!(!session.is_closed());

        session.rollback_transaction().await.unwrap();
        assert!(!session.in_transaction());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_scalar_queries() {
        let (session, server) = connect(config(), |mut server| async move {
            server.accept_clear().await;
            server.expect_sql(Command::Select, "SHOW LASTROWID;").await;
            server.scalar(42).await;
            server.expect_sql(Command::Select, "SELECT changes();").await;
            server.scalar(3).await;
            server.expect_sql(Command::Select, "SHOW CHANGES;").await;
            server.reply(Default::default(), &[]).await;
        })
        .await;

        assert_eq!(session.last_inserted_rowid().await.unwrap(), 42);
        assert_eq!(session.changes().await.unwrap(), 3);
        // An empty reply reads as zero
        assert_eq!(session.affected_rows().await.unwrap(), 0);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_trace_sink_sees_statements() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let (session, server) = connect(config(), |mut server| async move {
            server.accept_clear().await;
            server.expect_sql(Command::Execute, "UPDATE t SET a = 1;").await;
            server.ok().await;
            server.changes(4).await;
        })
        .await;

        let captured = Arc::clone(&lines);
        session.set_trace_sink(move |line: &str| captured.lock().unwrap().push(line.to_string()));
        assert_eq!(session.execute("UPDATE t SET a = 1;").await.unwrap(), 4);
        server.await.unwrap();

        // The internal changes query is not traced
        assert_eq!(*lines.lock().unwrap(), vec!["UPDATE t SET a = 1;"]);
    }

    #[tokio::test]
    async fn test_bind_execute() {
        let (session, server) = connect(config().compress_chunks(false), |mut server| async move {
            server.accept_clear().await;
            server
                .expect_sql(Command::ChunkBind, "INSERT INTO t VALUES (?1, ?2, ?3);")
                .await;
            server.ok().await;

            let expected: [(BindType, &[u8]); 3] = [
                (BindType::Integer, b"7\0"),
                (BindType::Text, b"bolt\0"),
                (BindType::Blob, b"\x01\x02"),
            ];
            for (bind_type, data) in expected {
                let chunk = server.expect(Command::ChunkBind, selector::BIND_STEP).await;
                assert_eq!(chunk.header.flag3, bind_type as u8);
                assert!(chunk.header.has_flag(client_flags::PARTIAL_PACKET));
                assert_eq!(&chunk.body[..], data);
                server.ok().await;
            }

            server.expect(Command::ChunkBind, selector::BIND_FINALIZE).await;
            server.ok().await;
            server.changes(1).await;
        })
        .await;

        let values = [
            BindValue::Int32(7),
            BindValue::Text("bolt".to_string()),
            BindValue::Blob(vec![1u8, 2].into()),
        ];
        let changed = session
            .bind_execute("INSERT INTO t VALUES (?1, ?2, ?3);", &values)
            .await
            .unwrap();
        assert_eq!(changed, 1);
        server.await.unwrap();
    }
}

mod data_channel_tests {
    use super::*;
    use cubesql::ReplyHeader;

    #[tokio::test]
    async fn test_send_blob_in_chunks() {
        let config = config().chunk_size(4).compress_chunks(false);
        let (session, server) = connect(config, |mut server| async move {
            server.accept_clear().await;
            let mut received = Vec::new();
            for _ in 0..3 {
                let chunk = server.expect(Command::Chunk, selector::NONE).await;
                assert!(chunk.header.has_flag(client_flags::PARTIAL_PACKET));
                received.extend_from_slice(&chunk.body);
                server.ok().await;
            }
            assert_eq!(received, b"0123456789");
            server.expect(Command::EndChunk, selector::NONE).await;
            server.ok().await;
        })
        .await;

        session.send_blob(&b"0123456789"[..]).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_blob_reassembles() {
        let (session, server) = connect(config(), |mut server| async move {
            server.accept_clear().await;
            server.reply(ReplyHeader::default(), b"abc").await;
            server.expect(Command::Chunk, selector::NONE).await;
            server.reply(ReplyHeader::default(), b"def").await;
            server.expect(Command::Chunk, selector::NONE).await;
            server.end_chunk().await;
            server.expect(Command::Chunk, selector::NONE).await;
        })
        .await;

        let blob = session.receive_blob().await.unwrap();
        assert_eq!(&blob[..], b"abcdef");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_data_single_chunk() {
        let (session, server) = connect(config(), |mut server| async move {
            server.accept_clear().await;
            server.reply(ReplyHeader::default(), b"xyz").await;
            server.expect(Command::Chunk, selector::NONE).await;
        })
        .await;

        let (data, is_end) = session.receive_data().await.unwrap();
        assert_eq!(&data[..], b"xyz");
        assert!(!is_end);
        server.await.unwrap();
    }
}

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_disconnect_makes_handles_stale() {
        let (session, server) = connect(config(), |mut server| async move {
            server.accept_clear().await;
            server.expect_sql(Command::Select, "SELECT a FROM t;").await;
            let (header, payload) = cursor_frame(
                &[("a", cubesql::ColumnType::Integer)],
                &[vec![Some(&b"1"[..])], vec![Some(&b"2"[..])]],
            );
            server.reply(header, &payload).await;
            server.expect(Command::Close, selector::NONE).await;
            server.ok().await;
        })
        .await;

        let mut cursor = session.select("SELECT a FROM t;").await.unwrap();
        assert_eq!(cursor.int(1, 0).unwrap(), 1);

        session.disconnect().await.unwrap();
        server.await.unwrap();
        assert!(session.is_closed());
        assert_eq!(session.state(), SessionState::Disconnected);

        assert!(matches!(cursor.int(1, 0), Err(Error::StaleHandle(_))));
        assert!(matches!(session.ping().await, Err(Error::ConnectionClosed)));
        // Releasing a stale cursor is still allowed
        cursor.free().await.unwrap();
        // Disconnecting twice is a no-op
        session.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_interrupts_request() {
        let (session, server) = connect(config(), |mut server| async move {
            server.accept_clear().await;
            server.expect_sql(Command::Execute, "SELECT slow();").await;
            // Never answer; hold the pipe open until the client gives up
            tokio::time::sleep(Duration::from_secs(2)).await;
        })
        .await;

        let handle = session.cancel_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });

        let err = session.execute("SELECT slow();").await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(session.is_closed());
        assert_eq!(session.last_error().code, Error::Cancelled.code());
        assert!(matches!(session.ping().await, Err(Error::ConnectionClosed)));
        server.abort();
    }

    #[tokio::test]
    async fn test_timeout_reports_error() {
        let config = config().timeout(Duration::from_millis(100));
        let (session, server) = connect(config, |mut server| async move {
            server.accept_clear().await;
            server.expect_sql(Command::Execute, "PING;").await;
            tokio::time::sleep(Duration::from_secs(1)).await;
        })
        .await;

        let err = session.ping().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(session.last_error().is_error());
        server.abort();
    }

    #[tokio::test]
    async fn test_peer_gone() {
        let (session, server) = connect(config(), |mut server| async move {
            server.accept_clear().await;
        })
        .await;
        server.await.unwrap();

        let err = session.ping().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert!(session.is_closed());
    }
}
