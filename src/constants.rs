//! CubeSQL protocol constants
//!
//! Command codes, selectors, header flag bits, encryption modes, column and
//! bind types, and the client error codes used on the wire.

use crate::error::Error;

// =============================================================================
// Frame Layout
// =============================================================================

/// Size of both the request and the reply header
pub const HEADER_SIZE: usize = 32;

/// Signature carried by every header (`'SQLS'`)
pub const PROTOCOL_SIGNATURE: u32 = 0x5351_4C53;

/// AES block size, also the size of the IV preceding encrypted payloads
pub const BLOCK_LEN: usize = 16;

/// Size of the random pools exchanged during login
pub const RAND_POOL_SIZE: usize = 20;

/// SHA-1 digest size
pub const SHA1_DIGEST_SIZE: usize = 20;

/// Reply error code marking the end of a chunked transfer
pub const END_CHUNK: u16 = 777;

/// Default CubeSQL server port
pub const DEFAULT_PORT: u16 = 4430;

/// Default network timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 12;

/// Protocol versions (request header byte 14)
#[allow(missing_docs)]
pub mod protocol_version {
    pub const V2007: u8 = 3;
    pub const V2011: u8 = 4;
}

// =============================================================================
// Commands
// =============================================================================

/// Request commands (request header byte 8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Login phases
    Connect = 1,
    /// Query returning a cursor
    Select = 2,
    /// Statement without a result set
    Execute = 3,
    /// Binary data chunk
    Chunk = 5,
    /// End of binary data
    EndChunk = 6,
    /// Graceful disconnect
    Close = 7,
    /// Bind-execute protocol
    ChunkBind = 8,
    /// Fetch the next row of a server-side cursor
    CursorStep = 9,
    /// Release a server-side cursor
    CursorClose = 10,
    /// Compile a program
    VmPrepare = 50,
    /// Bind one program parameter
    VmBind = 51,
    /// Run a program without a result set
    VmExecute = 52,
    /// Run a program returning a cursor
    VmSelect = 53,
    /// Release a program
    VmClose = 54,
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Command::Connect),
            2 => Ok(Command::Select),
            3 => Ok(Command::Execute),
            5 => Ok(Command::Chunk),
            6 => Ok(Command::EndChunk),
            7 => Ok(Command::Close),
            8 => Ok(Command::ChunkBind),
            9 => Ok(Command::CursorStep),
            10 => Ok(Command::CursorClose),
            50 => Ok(Command::VmPrepare),
            51 => Ok(Command::VmBind),
            52 => Ok(Command::VmExecute),
            53 => Ok(Command::VmSelect),
            54 => Ok(Command::VmClose),
            _ => Err(Error::MalformedFrame(format!("unknown command {}", value))),
        }
    }
}

/// Request selectors (request header byte 9)
#[allow(missing_docs)]
pub mod selector {
    pub const NONE: u8 = 0;
    pub const CLEAR_CONNECT_PHASE1: u8 = 1;
    pub const CLEAR_CONNECT_PHASE2: u8 = 2;
    pub const ENCRYPT_CONNECT_PHASE1: u8 = 3;
    pub const ENCRYPT_CONNECT_PHASE2: u8 = 4;
    pub const CLEAR_TOKEN_CONNECT1: u8 = 5;
    pub const CLEAR_TOKEN_CONNECT2: u8 = 6;
    pub const ENCRYPT_TOKEN_CONNECT1: u8 = 7;
    pub const ENCRYPT_TOKEN_CONNECT2: u8 = 8;
    pub const CHUNK_OK: u8 = 20;
    pub const CHUNK_ABORT: u8 = 21;
    pub const BIND_STEP: u8 = 30;
    pub const BIND_FINALIZE: u8 = 31;
    pub const BIND_ABORT: u8 = 32;
}

// =============================================================================
// Header Flags
// =============================================================================

/// Request flag1 bits
#[allow(missing_docs)]
pub mod client_flags {
    pub const SUPPORT_COMPRESSION: u8 = 0x01;
    pub const COMPRESSED_PACKET: u8 = 0x02;
    pub const PARTIAL_PACKET: u8 = 0x04;
    pub const REQUEST_SERVER_SIDE: u8 = 0x08;
}

/// Reply flag1 bits
#[allow(missing_docs)]
pub mod server_flags {
    pub const PARTIAL_PACKET: u8 = 0x01;
    pub const COMPRESSED_PACKET: u8 = 0x02;
    pub const HAS_ROWID_COLUMN: u8 = 0x04;
    pub const HAS_TABLE_NAME: u8 = 0x08;
    pub const SERVER_SIDE: u8 = 0x10;
}

// =============================================================================
// Encryption
// =============================================================================

/// Encryption mode selected at connect time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Encryption {
    /// Plain bytes
    #[default]
    None = 0,
    /// AES-128 payload encryption
    Aes128 = 2,
    /// AES-192 payload encryption
    Aes192 = 3,
    /// AES-256 payload encryption
    Aes256 = 4,
    /// TLS-wrapped stream
    Ssl = 8,
    /// TLS plus AES-128 payload encryption
    SslAes128 = 10,
    /// TLS plus AES-192 payload encryption
    SslAes192 = 11,
    /// TLS plus AES-256 payload encryption
    SslAes256 = 12,
}

impl Encryption {
    /// Whether the stream is wrapped in TLS
    pub fn is_ssl(self) -> bool {
        matches!(
            self,
            Encryption::Ssl | Encryption::SslAes128 | Encryption::SslAes192 | Encryption::SslAes256
        )
    }

    /// The payload encryption left once TLS is stripped
    pub fn payload_mode(self) -> Encryption {
        match self {
            Encryption::Ssl => Encryption::None,
            Encryption::SslAes128 => Encryption::Aes128,
            Encryption::SslAes192 => Encryption::Aes192,
            Encryption::SslAes256 => Encryption::Aes256,
            other => other,
        }
    }

    /// AES key length in bytes, zero when payloads travel in clear
    pub fn key_len(self) -> usize {
        match self.payload_mode() {
            Encryption::Aes128 => 16,
            Encryption::Aes192 => 24,
            Encryption::Aes256 => 32,
            _ => 0,
        }
    }

    /// Name used in connection URLs
    pub fn as_str(self) -> &'static str {
        match self {
            Encryption::None => "none",
            Encryption::Aes128 => "aes128",
            Encryption::Aes192 => "aes192",
            Encryption::Aes256 => "aes256",
            Encryption::Ssl => "ssl",
            Encryption::SslAes128 => "ssl+aes128",
            Encryption::SslAes192 => "ssl+aes192",
            Encryption::SslAes256 => "ssl+aes256",
        }
    }
}

impl TryFrom<i32> for Encryption {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Encryption::None),
            2 | 128 => Ok(Encryption::Aes128),
            3 | 192 => Ok(Encryption::Aes192),
            4 | 256 => Ok(Encryption::Aes256),
            8 => Ok(Encryption::Ssl),
            10 => Ok(Encryption::SslAes128),
            11 => Ok(Encryption::SslAes192),
            12 => Ok(Encryption::SslAes256),
            _ => Err(Error::InvalidConfig(format!(
                "unknown encryption mode {}",
                value
            ))),
        }
    }
}

impl std::str::FromStr for Encryption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Encryption::None),
            "aes128" => Ok(Encryption::Aes128),
            "aes192" => Ok(Encryption::Aes192),
            "aes256" => Ok(Encryption::Aes256),
            "ssl" | "tls" => Ok(Encryption::Ssl),
            "ssl+aes128" => Ok(Encryption::SslAes128),
            "ssl+aes192" => Ok(Encryption::SslAes192),
            "ssl+aes256" => Ok(Encryption::SslAes256),
            other => other
                .parse::<i32>()
                .map_err(|_| Error::InvalidConfig(format!("unknown encryption mode {}", s)))
                .and_then(Encryption::try_from),
        }
    }
}

impl std::fmt::Display for Encryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Column and Bind Types
// =============================================================================

/// Column types reported in the cursor header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum ColumnType {
    None = 0,
    Integer = 1,
    Float = 2,
    Text = 3,
    Blob = 4,
    Boolean = 5,
    Date = 6,
    Time = 7,
    Timestamp = 8,
    Currency = 9,
}

impl ColumnType {
    /// Bind type a value read from this column should be bound back with
    pub fn bind_type(self) -> BindType {
        match self {
            ColumnType::Integer => BindType::Integer,
            ColumnType::Float => BindType::Double,
            ColumnType::Blob => BindType::Blob,
            _ => BindType::Text,
        }
    }
}

impl From<u32> for ColumnType {
    /// Unknown codes decode as `None` so newer servers stay readable
    fn from(value: u32) -> Self {
        match value {
            1 => ColumnType::Integer,
            2 => ColumnType::Float,
            3 => ColumnType::Text,
            4 => ColumnType::Blob,
            5 => ColumnType::Boolean,
            6 => ColumnType::Date,
            7 => ColumnType::Time,
            8 => ColumnType::Timestamp,
            9 => ColumnType::Currency,
            _ => ColumnType::None,
        }
    }
}

/// Bind types carried in request flag3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum BindType {
    Integer = 1,
    Double = 2,
    Text = 3,
    Blob = 4,
    Null = 5,
    Int64 = 8,
    ZeroBlob = 9,
}

// =============================================================================
// Cursor Addressing
// =============================================================================

/// Integer seek and addressing codes used by the SDK's cursor calls
#[allow(missing_docs)]
pub mod cursor_code {
    pub const CURROW: i32 = -1;
    pub const COLNAME: i32 = 0;
    pub const COLTABLE: i32 = -2;
    pub const ROWID: i32 = -666;

    pub const SEEK_NEXT: i32 = -2;
    pub const SEEK_FIRST: i32 = -3;
    pub const SEEK_LAST: i32 = -4;
    pub const SEEK_PREV: i32 = -5;
}

// =============================================================================
// Error Codes
// =============================================================================

/// Client-side error codes reported through `Session::last_error`
#[allow(missing_docs)]
pub mod error_code {
    pub const NOERR: i32 = 0;
    pub const ERR: i32 = -1;
    pub const MEMORY_ERROR: i32 = -2;
    pub const PARAMETER_ERROR: i32 = -3;
    pub const PROTOCOL_ERROR: i32 = -4;
    pub const ZLIB_ERROR: i32 = -5;
    pub const SSL_ERROR: i32 = -6;
    pub const SSL_CERT_ERROR: i32 = -7;

    // Local handle misuse, one code per kind
    pub const BIND_RANGE_ERROR: i32 = -10;
    pub const USE_AFTER_CLOSE_ERROR: i32 = -11;
    pub const OUT_OF_RANGE_ERROR: i32 = -12;
    pub const STALE_HANDLE_ERROR: i32 = -13;

    pub const ERR_SOCKET: i32 = 800;
    pub const ERR_SOCKET_TIMEOUT: i32 = 801;
    pub const ERR_SOCKET_READ: i32 = 802;
    pub const ERR_SOCKET_WRITE: i32 = 803;
    pub const ERR_WRONG_SIGNATURE: i32 = 804;
    pub const ERR_WRONG_HEADER: i32 = 805;
    pub const ERR_SSL: i32 = 806;
}
