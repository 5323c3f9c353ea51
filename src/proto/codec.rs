use bytes::BytesMut;
use std::{io, str};
use tokio_util::codec::{Decoder, Encoder};

/// Frames the ASCII line protocol spoken by the WT-series meters. One
/// command or response per line, terminated by a line feed. Responses are
/// handed out with surrounding whitespace (including a trailing CR, if the
/// instrument sends one) stripped.
#[derive(Default)]
pub(crate) struct LineCodec;

impl Decoder for LineCodec {
    type Item = String;
    // We use io::Error here because at this level an instrument error
    // status is still a successfully decoded line. Deciding whether a
    // response means trouble is up to the command engine.
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(pos) = src.iter().position(|b| *b == b'\n') else {
            return Ok(None);
        };
        let line = src.split_to(pos + 1);
        let line = str::from_utf8(&line)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        Ok(Some(line.trim().to_string()))
    }
}

impl Encoder<String> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item.as_bytes());
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_waits_for_terminator() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from(&b":STAT:ERR"[..]);
        assert_eq!(codec.decode(&mut buf).expect("decode"), None);

        buf.extend_from_slice(b"?\n0,\"NO ERROR\"\r\n");
        assert_eq!(
            codec.decode(&mut buf).expect("decode"),
            Some(":STAT:ERR?".to_string())
        );
        assert_eq!(
            codec.decode(&mut buf).expect("decode"),
            Some("0,\"NO ERROR\"".to_string())
        );
        assert_eq!(codec.decode(&mut buf).expect("decode"), None);
    }

    #[test]
    fn encode_appends_line_feed() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::new();
        codec.encode("*IDN?".to_string(), &mut buf).expect("encode");
        assert_eq!(&buf[..], b"*IDN?\n");
    }
}
