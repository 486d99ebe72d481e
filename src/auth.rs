//! Login handshake
//!
//! Two flows exist. The clear login answers a random challenge with
//! `SHA1(R || SHA1(SHA1(P)))`. The encrypted login exchanges random pools
//! under a key derived from the password and leaves both sides holding the
//! session key:
//!
//! ```text
//! client -> server   hash(user, IV), AES(H(H(P)))[X || H(X)]
//! server -> client   AES(H(H(P)))[Y || H(Y)]
//! client -> server   AES(S)[H(P)] [, AES(S)[token]]
//! ```
//!
//! An optional token adds a field to the second phase of either flow.

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::Config;
use crate::constants::{error_code, selector, Command, BLOCK_LEN, RAND_POOL_SIZE, SHA1_DIGEST_SIZE};
use crate::crypto::{
    derive_session_key, double_sha1, hex_hash_username, hex_hash_username_with_iv, random_iv,
    random_pool, scramble_password, sha1, PayloadCipher,
};
use crate::error::{Error, Result};
use crate::packet::{ReplyHeader, RequestFrame};
use crate::session::{IoGuard, SessionInner};

/// Size of the sealed `Y || H(Y)` reply
const POOL_REPLY_SIZE: usize = BLOCK_LEN + RAND_POOL_SIZE + SHA1_DIGEST_SIZE;

/// Run the login flow selected by the configured encryption mode
///
/// Server refusals surface as [`Error::Authentication`]; transport and
/// framing failures keep their own kind.
pub(crate) async fn login(inner: &mut SessionInner, guard: &IoGuard<'_>, config: &Config) -> Result<()> {
    let result = if config.encryption.key_len() > 0 {
        login_encrypted(inner, guard, config).await
    } else {
        login_clear(inner, guard, config).await
    };
    result.map_err(|e| match e {
        Error::Server { code, message } => Error::Authentication { code, message },
        other => other,
    })
}

fn cstring(s: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(s.len() + 1);
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
    buf.freeze()
}

/// Check the size and field count a login phase expects
fn expect_shape(header: &ReplyHeader, size: usize, fields: u32) -> Result<()> {
    if header.packet_size as usize != size {
        return Err(Error::MalformedFrame(format!(
            "login reply of {} bytes, expected {}",
            header.packet_size, size
        )));
    }
    if header.num_fields != fields {
        return Err(Error::MalformedFrame(format!(
            "login reply with {} fields, expected {}",
            header.num_fields, fields
        )));
    }
    Ok(())
}

async fn login_clear(inner: &mut SessionInner, guard: &IoGuard<'_>, config: &Config) -> Result<()> {
    let token = config.token.as_deref();
    let user = if config.legacy_protocol {
        config.username.clone()
    } else {
        hex_hash_username(&config.username)
    };

    let phase1 = if token.is_some() {
        selector::CLEAR_TOKEN_CONNECT1
    } else {
        selector::CLEAR_CONNECT_PHASE1
    };
    let frame = inner
        .codec
        .request(Command::Connect, phase1)
        .with_fields(&[&cstring(&user)]);
    inner.send(frame, guard).await?;

    let challenge = inner.read_frame(guard).await?;
    expect_shape(&challenge.header, RAND_POOL_SIZE, 1)?;
    let response = scramble_password(&challenge.payload, config.password());

    let phase2 = if token.is_some() {
        selector::CLEAR_TOKEN_CONNECT2
    } else {
        selector::CLEAR_CONNECT_PHASE2
    };
    let request = inner.codec.request(Command::Connect, phase2);
    let frame = match token {
        Some(token) => request.with_fields(&[&response, &cstring(token)]),
        None => request.with_fields(&[&response]),
    };
    inner.send(frame, guard).await?;

    let reply = inner.read_frame(guard).await?;
    expect_shape(&reply.header, 0, 0)?;
    tracing::debug!(legacy = config.legacy_protocol, token = token.is_some(), "clear login accepted");
    Ok(())
}

async fn login_encrypted(inner: &mut SessionInner, guard: &IoGuard<'_>, config: &Config) -> Result<()> {
    let mode = config.encryption;
    let token = config.token.as_deref();
    let password = config.password();

    // Phase 1: X || H(X) under the password key
    let client_pool = random_pool();
    let password_hash = double_sha1(password.as_bytes());
    let password_key = PayloadCipher::new(&password_hash[..16])?;

    let mut plain = Vec::with_capacity(RAND_POOL_SIZE + SHA1_DIGEST_SIZE);
    plain.extend_from_slice(&client_pool);
    plain.extend_from_slice(&sha1(&client_pool));
    let iv = random_iv();
    let sealed = password_key.seal_with_iv(&iv, &plain)?;

    let user = cstring(&if config.legacy_protocol {
        config.username.clone()
    } else {
        hex_hash_username_with_iv(&config.username, &iv)
    });

    let phase1 = if token.is_some() {
        selector::ENCRYPT_TOKEN_CONNECT1
    } else {
        selector::ENCRYPT_CONNECT_PHASE1
    };
    let mut header = inner.codec.header(Command::Connect, phase1);
    header.encrypted_packet = mode.payload_mode() as u8;

    let mut body = BytesMut::with_capacity(user.len() + sealed.len());
    body.put_slice(&user);
    body.put_slice(&sealed);
    let frame = RequestFrame::new(header)
        .with_raw_body(vec![user.len() as u32, sealed.len() as u32], body.freeze());
    inner.send(frame, guard).await?;

    // Phase 1.5: Y || H(Y), verified
    let (reply, raw) = inner.read_raw(guard).await?;
    expect_shape(&reply, POOL_REPLY_SIZE, 1)?;
    let opened = password_key.open(&raw)?;
    let (server_pool, server_hash) = opened.split_at(RAND_POOL_SIZE);
    if sha1(server_pool)[..] != server_hash[..] {
        return Err(Error::Authentication {
            code: error_code::ERR,
            message: "server failed the key exchange check".to_string(),
        });
    }
    let mut pool = [0u8; RAND_POOL_SIZE];
    pool.copy_from_slice(server_pool);

    let key = derive_session_key(mode, &password_hash, &client_pool, &pool)?;
    let session_cipher = PayloadCipher::new(&key)?;

    // Phase 2: H(P) and the token under the session key
    let proof = session_cipher.seal(&sha1(password.as_bytes()))?;
    let mut sizes = vec![proof.len() as u32];
    let mut body = BytesMut::from(&proof[..]);
    if let Some(token) = token {
        let sealed_token = session_cipher.seal(&cstring(token))?;
        sizes.push(sealed_token.len() as u32);
        body.put_slice(&sealed_token);
    }

    let phase2 = if token.is_some() {
        selector::ENCRYPT_TOKEN_CONNECT2
    } else {
        selector::ENCRYPT_CONNECT_PHASE2
    };
    let frame = inner
        .codec
        .request(Command::Connect, phase2)
        .with_raw_body(sizes, body.freeze());
    inner.send(frame, guard).await?;

    let (reply, _) = inner.read_raw(guard).await?;
    expect_shape(&reply, 0, 0)?;

    inner.codec.set_encryption(mode, Some(session_cipher));
    tracing::debug!(encryption = %mode, token = token.is_some(), "encrypted login accepted");
    Ok(())
}
