//! In-memory CubeSQL server used by the session tests
//!
//! The client side of a duplex pipe is handed to
//! `Session::connect_with_transport`; the test drives the server side step
//! by step with the helpers below.

#![allow(dead_code)]

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use cubesql::buffer::{ReadBuffer, WriteBuffer};
use cubesql::constants::{selector, server_flags, Command, HEADER_SIZE, RAND_POOL_SIZE};
use cubesql::crypto::{
    derive_session_key, double_sha1, hex_hash_username, scramble_password, sha1, PayloadCipher,
};
use cubesql::{ColumnType, Config, Encryption, ReplyHeader, RequestHeader, Session, StreamTransport};

pub const USER: &str = "admin";
pub const PASSWORD: &str = "secret";
pub const CHALLENGE: [u8; RAND_POOL_SIZE] = [7u8; RAND_POOL_SIZE];

/// A request as the server sees it
#[derive(Debug)]
pub struct Request {
    pub header: RequestHeader,
    pub body: Bytes,
}

impl Request {
    /// Field data after the size array, opened with `cipher` when sealed
    pub fn data(&self, cipher: Option<&PayloadCipher>) -> Vec<u8> {
        let skip = self.header.num_fields as usize * 4;
        let data = &self.body[skip..];
        match cipher {
            Some(cipher) if !data.is_empty() => cipher.open(data).unwrap(),
            _ => data.to_vec(),
        }
    }

    /// Raw field data split along the size array
    pub fn fields(&self) -> Vec<Bytes> {
        let count = self.header.num_fields as usize;
        let mut sizes = ReadBuffer::from_slice(&self.body[..count * 4]);
        let mut offset = count * 4;
        (0..count)
            .map(|_| {
                let len = sizes.read_u32_be().unwrap() as usize;
                let field = self.body.slice(offset..offset + len);
                offset += len;
                field
            })
            .collect()
    }

    /// Statement text of a single-field request, without the terminator
    pub fn sql(&self, cipher: Option<&PayloadCipher>) -> String {
        let data = self.data(cipher);
        String::from_utf8(data).unwrap().trim_end_matches('\0').to_string()
    }
}

pub struct MockServer {
    stream: DuplexStream,
    /// Session key once an encrypted login completed
    pub cipher: Option<PayloadCipher>,
}

impl MockServer {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            cipher: None,
        }
    }

    pub async fn read_request(&mut self) -> Request {
        let mut head = [0u8; HEADER_SIZE];
        self.stream.read_exact(&mut head).await.unwrap();
        let header = RequestHeader::parse(&head).unwrap();
        let mut body = vec![0u8; header.packet_size as usize];
        self.stream.read_exact(&mut body).await.unwrap();
        Request {
            header,
            body: Bytes::from(body),
        }
    }

    /// Read a request and check its command and selector
    pub async fn expect(&mut self, command: Command, selector: u8) -> Request {
        let request = self.read_request().await;
        assert_eq!(request.header.command, command);
        assert_eq!(request.header.selector, selector);
        request
    }

    /// Read a statement request and check its SQL
    pub async fn expect_sql(&mut self, command: Command, sql: &str) -> Request {
        let request = self.expect(command, selector::NONE).await;
        assert_eq!(request.sql(self.cipher.as_ref()), sql);
        request
    }

    pub async fn reply(&mut self, mut header: ReplyHeader, payload: &[u8]) {
        header.packet_size = payload.len() as u32;
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(payload);
        self.stream.write_all(&bytes).await.unwrap();
    }

    pub async fn ok(&mut self) {
        self.reply(ReplyHeader::default(), &[]).await;
    }

    pub async fn fail(&mut self, code: u16, message: &str) {
        self.reply(ReplyHeader::failure(code, 0), message.as_bytes())
            .await;
    }

    pub async fn end_chunk(&mut self) {
        self.reply(ReplyHeader::end_chunk(), &[]).await;
    }

    /// Answer a query with a single integer cell
    pub async fn scalar(&mut self, value: i64) {
        let text = value.to_string();
        let (header, payload) = cursor_frame(&[("value", ColumnType::Integer)], &[vec![Some(text.as_bytes())]]);
        self.reply(header, &payload).await;
    }

    /// Answer the `SHOW CHANGES;` that follows every execute
    pub async fn changes(&mut self, value: i64) {
        self.expect_sql(Command::Select, "SHOW CHANGES;").await;
        self.scalar(value).await;
    }

    /// Serve the clear login with the fixed challenge
    pub async fn accept_clear(&mut self) {
        self.accept_clear_login(None).await;
    }

    /// Serve the clear login and check the token sent with the response
    pub async fn accept_clear_token(&mut self, token: &str) {
        self.accept_clear_login(Some(token)).await;
    }

    async fn accept_clear_login(&mut self, token: Option<&str>) {
        let (first, second) = match token {
            Some(_) => (selector::CLEAR_TOKEN_CONNECT1, selector::CLEAR_TOKEN_CONNECT2),
            None => (selector::CLEAR_CONNECT_PHASE1, selector::CLEAR_CONNECT_PHASE2),
        };
        let phase1 = self.expect(Command::Connect, first).await;
        assert_eq!(phase1.fields(), vec![cstring(&hex_hash_username(USER))]);

        let mut challenge = ReplyHeader::default();
        challenge.num_fields = 1;
        self.reply(challenge, &CHALLENGE).await;

        let phase2 = self.expect(Command::Connect, second).await;
        let fields = phase2.fields();
        assert_eq!(&fields[0][..], &scramble_password(&CHALLENGE, PASSWORD)[..]);
        match token {
            Some(token) => assert_eq!(fields[1..].to_vec(), vec![cstring(token)]),
            None => assert_eq!(fields.len(), 1),
        }
        self.ok().await;
    }

    /// Serve the encrypted login and keep the session key
    pub async fn accept_encrypted(&mut self, mode: Encryption) {
        self.accept_encrypted_login(mode, None).await;
    }

    /// Serve the encrypted login and check the sealed token
    pub async fn accept_encrypted_token(&mut self, mode: Encryption, token: &str) {
        self.accept_encrypted_login(mode, Some(token)).await;
    }

    async fn accept_encrypted_login(&mut self, mode: Encryption, token: Option<&str>) {
        let (first, second) = match token {
            Some(_) => (selector::ENCRYPT_TOKEN_CONNECT1, selector::ENCRYPT_TOKEN_CONNECT2),
            None => (selector::ENCRYPT_CONNECT_PHASE1, selector::ENCRYPT_CONNECT_PHASE2),
        };
        let phase1 = self.expect(Command::Connect, first).await;
        assert_eq!(phase1.header.encrypted_packet, mode as u8);
        let fields = phase1.fields();
        assert_eq!(fields.len(), 2);

        let password_hash = double_sha1(PASSWORD.as_bytes());
        let password_key = PayloadCipher::new(&password_hash[..16]).unwrap();
        let opened = password_key.open(&fields[1]).unwrap();
        let (client_pool, client_check) = opened.split_at(RAND_POOL_SIZE);
        assert_eq!(&sha1(client_pool)[..], client_check);

        let server_pool = [3u8; RAND_POOL_SIZE];
        let mut plain = server_pool.to_vec();
        plain.extend_from_slice(&sha1(&server_pool));
        let mut reply = ReplyHeader::default();
        reply.num_fields = 1;
        self.reply(reply, &password_key.seal(&plain).unwrap()).await;

        let mut pool = [0u8; RAND_POOL_SIZE];
        pool.copy_from_slice(client_pool);
        let key = derive_session_key(mode, &password_hash, &pool, &server_pool).unwrap();
        let cipher = PayloadCipher::new(&key).unwrap();

        // Each phase 2 field is sealed on its own
        let phase2 = self.expect(Command::Connect, second).await;
        let fields = phase2.fields();
        assert_eq!(cipher.open(&fields[0]).unwrap(), sha1(PASSWORD.as_bytes()).to_vec());
        match token {
            Some(token) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(cipher.open(&fields[1]).unwrap(), cstring(token).to_vec());
            }
            None => assert_eq!(fields.len(), 1),
        }
        self.ok().await;
        self.cipher = Some(cipher);
    }
}

fn cstring(s: &str) -> Bytes {
    Bytes::from(format!("{}\0", s))
}

pub fn config() -> Config {
    Config::new("localhost", 4430, USER, PASSWORD)
}

/// Connect a session to a fresh mock server running `script`
///
/// Returns the session and the server task; awaiting the task surfaces any
/// assertion that failed on the server side.
pub async fn connect<F, Fut>(config: Config, script: F) -> (Session, tokio::task::JoinHandle<()>)
where
    F: FnOnce(MockServer) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let (client, server) = tokio::io::duplex(1 << 16);
    let task = tokio::spawn(script(MockServer::new(server)));
    let session = Session::connect_with_transport(config, Box::new(StreamTransport::new(client)))
        .await
        .unwrap();
    (session, task)
}

/// Encode a first cursor frame
pub fn cursor_frame(columns: &[(&str, ColumnType)], rows: &[Vec<Option<&[u8]>>]) -> (ReplyHeader, Bytes) {
    let mut buf = WriteBuffer::new();
    for (_, column_type) in columns {
        buf.write_u32_be(*column_type as u32);
    }
    write_cells(&mut buf, rows, |buf| {
        for (name, _) in columns {
            buf.write_cstring(name);
        }
    });
    let header = ReplyHeader {
        rows: rows.len() as u32,
        cols: columns.len() as u32,
        ..ReplyHeader::default()
    };
    (header, buf.freeze())
}

/// Encode a continuation cursor frame: sizes and data only
pub fn rows_frame(cols: usize, rows: &[Vec<Option<&[u8]>>]) -> (ReplyHeader, Bytes) {
    let mut buf = WriteBuffer::new();
    write_cells(&mut buf, rows, |_| {});
    let header = ReplyHeader {
        rows: rows.len() as u32,
        cols: cols as u32,
        ..ReplyHeader::default()
    };
    (header, buf.freeze())
}

fn write_cells(buf: &mut WriteBuffer, rows: &[Vec<Option<&[u8]>>], between: impl FnOnce(&mut WriteBuffer)) {
    for row in rows {
        for cell in row {
            buf.write_i32_be(cell.map_or(-1, |c| c.len() as i32));
        }
    }
    between(buf);
    for row in rows {
        for cell in row.iter().flatten() {
            buf.write_bytes(cell);
        }
    }
}

pub const PARTIAL: u8 = server_flags::PARTIAL_PACKET;
pub const SERVER_SIDE: u8 = server_flags::SERVER_SIDE;
