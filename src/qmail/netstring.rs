//-
// Copyright (c) 2026, The Qsubmit Authors
//
// This file is part of Qsubmit.
//
// Qsubmit is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public  License as published by the Free
// Software Foundation, either version  3 of the License, or (at  your option)
// any later version.
//
// Qsubmit is distributed  in the hope that  it will be useful,  but WITHOUT
// ANY WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or
// FITNESS FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License
// for more details.
//
// You should have received a copy of the GNU General Public License along with
// Qsubmit. If not, see <http://www.gnu.org/licenses/>.

//! Netstrings: `<length>:<payload>,`, where `length` is the decimal byte
//! length of `payload`.
//!
//! See <https://cr.yp.to/proto/netstrings.txt>. No limit is placed on the
//! length here; callers bound what they are willing to read.

use crate::support::error::Error;

/// Append the netstring encoding of `payload` to `dst`.
pub fn encode_into(dst: &mut Vec<u8>, payload: &[u8]) {
    dst.extend_from_slice(payload.len().to_string().as_bytes());
    dst.push(b':');
    dst.extend_from_slice(payload);
    dst.push(b',');
}

pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut dst = Vec::with_capacity(payload.len() + 24);
    encode_into(&mut dst, payload);
    dst
}

/// Decode a netstring which must make up the whole of `data`.
pub fn decode(data: &[u8]) -> Result<&[u8], Error> {
    let (payload, rest) = split(data)?;
    if rest.is_empty() {
        Ok(payload)
    } else {
        Err(Error::MalformedNetstring("trailing data after ','"))
    }
}

/// Decode the netstring at the start of `data`.
///
/// Returns the payload and whatever follows the terminating comma.
pub fn split(data: &[u8]) -> Result<(&[u8], &[u8]), Error> {
    let colon = data
        .iter()
        .position(|&b| b':' == b)
        .ok_or(Error::MalformedNetstring("missing ':'"))?;

    let digits = &data[..colon];
    if digits.is_empty() {
        return Err(Error::MalformedNetstring("missing length"));
    }

    let mut len = 0usize;
    for &digit in digits {
        if !digit.is_ascii_digit() {
            return Err(Error::MalformedNetstring("non-numeric length"));
        }

        len = len
            .checked_mul(10)
            .and_then(|l| l.checked_add(usize::from(digit - b'0')))
            .ok_or(Error::MalformedNetstring("length overflow"))?;
    }

    let body = &data[colon + 1..];
    if body.len() < len {
        return Err(Error::MalformedNetstring("payload shorter than length"));
    }

    match body[len..].split_first() {
        Some((&b',', rest)) => Ok((&body[..len], rest)),
        Some(_) => Err(Error::MalformedNetstring("length mismatch")),
        None => Err(Error::MalformedNetstring("missing ','")),
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn encode_literal() {
        assert_eq!(b"5:qmail,".to_vec(), encode(b"qmail"));
        assert_eq!(b"0:,".to_vec(), encode(b""));

        let mut dst = b"1:a,".to_vec();
        encode_into(&mut dst, b"hello world!");
        assert_eq!(b"1:a,12:hello world!,".to_vec(), dst);
    }

    #[test]
    fn decode_valid() {
        assert_eq!(b"qmail", decode(b"5:qmail,").unwrap());
        assert_eq!(b"", decode(b"0:,").unwrap());
        assert_eq!(b"a,b:c", decode(b"5:a,b:c,").unwrap());

        assert_eq!(
            (b"Kok" as &[u8], b"3:abc," as &[u8]),
            split(b"3:Kok,3:abc,").unwrap()
        );
    }

    #[test]
    fn decode_malformed() {
        fn reason(data: &[u8]) -> &'static str {
            match decode(data) {
                Err(Error::MalformedNetstring(reason)) => reason,
                r => panic!("Unexpected result: {:?}", r),
            }
        }

        assert_eq!("missing ':'", reason(b"5qmail,"));
        assert_eq!("missing ':'", reason(b""));
        assert_eq!("missing length", reason(b":qmail,"));
        assert_eq!("non-numeric length", reason(b"5x:qmail,"));
        assert_eq!("non-numeric length", reason(b"-5:qmail,"));
        assert_eq!("length overflow", reason(b"99999999999999999999999:x,"));
        assert_eq!("payload shorter than length", reason(b"7:qmail,"));
        assert_eq!("missing ','", reason(b"6:qmail,"));
        assert_eq!("length mismatch", reason(b"4:qmail,"));
        assert_eq!("missing ','", reason(b"5:qmail"));
        assert_eq!("length mismatch", reason(b"5:qmail;"));
        assert_eq!("trailing data after ','", reason(b"5:qmail,x"));
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(payload in prop::collection::vec(any::<u8>(), 0..512)) {
            let encoded = encode(&payload);
            prop_assert_eq!(&payload[..], decode(&encoded).unwrap());
        }

        #[test]
        fn split_leaves_following_data(
            a in prop::collection::vec(any::<u8>(), 0..64),
            b in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            let mut data = encode(&a);
            encode_into(&mut data, &b);

            let (first, rest) = split(&data).unwrap();
            prop_assert_eq!(&a[..], first);
            prop_assert_eq!(&b[..], decode(rest).unwrap());
        }
    }
}
