//! End-of-message framing on top of an established connection.
//!
//! The connection already delivers whole messages, but applications built on
//! the classic socket drivers mark the end of their text with a delimiter
//! and read until they see it, whatever buffer size they read with.

use crate::connection::Connection;
use crate::error::ConnError;
use crate::header::HeaderError;
use crate::socket::Datagram;

/// Marker appended to every framed message.
pub const END_OF_MESSAGE: &str = "\r\n\r\n";

/// Send `text` followed by [`END_OF_MESSAGE`].
pub async fn send_framed<D: Datagram>(conn: &mut Connection<D>, text: &str) -> Result<(), ConnError> {
    let mut framed = String::with_capacity(text.len() + END_OF_MESSAGE.len());
    framed.push_str(text);
    framed.push_str(END_OF_MESSAGE);
    conn.send(&framed).await
}

/// Read with `buf_size`-byte calls until [`END_OF_MESSAGE`] arrives.
///
/// Returns the text without the marker, or `None` if the peer closed the
/// connection before completing a message.
pub async fn recv_framed<D: Datagram>(
    conn: &mut Connection<D>,
    buf_size: usize,
) -> Result<Option<String>, ConnError> {
    let buf_size = buf_size.max(1);
    let mut bytes = Vec::new();

    loop {
        let part = conn.recv(buf_size).await?;
        if part.is_empty() && conn.is_closed() {
            if !bytes.is_empty() {
                log::warn!("[framing] peer closed after {} unterminated byte(s)", bytes.len());
            }
            return Ok(None);
        }
        bytes.extend_from_slice(&part);

        if bytes.ends_with(END_OF_MESSAGE.as_bytes()) {
            bytes.truncate(bytes.len() - END_OF_MESSAGE.len());
            let text = String::from_utf8(bytes).map_err(|_| HeaderError::NotUtf8)?;
            return Ok(Some(text));
        }
    }
}
