//! Server-side sort request control (RFC 2891)

use bytes::BytesMut;
use ldap3::asn1::{write, ASNTag, Boolean, OctetString, Sequence, Tag, TagClass};
use ldap3::controls::RawControl;
use rollcall_core::types::{SortCriterion, SortDirection};
use rollcall_core::Result;

pub const SERVER_SIDE_SORT_OID: &str = "1.2.840.113556.1.4.473";

/// Sort request for a single attribute. Marked critical so a server that
/// cannot sort fails the search instead of returning an unsorted prefix.
pub fn sort_control(attribute: &str, criterion: &SortCriterion) -> Result<RawControl> {
    let descending = criterion.direction == SortDirection::Descending;
    Ok(RawControl {
        ctype: SERVER_SIDE_SORT_OID.to_string(),
        crit: true,
        val: Some(encode_sort_keys(attribute, descending)?),
    })
}

/// `SortKeyList ::= SEQUENCE OF SEQUENCE { attributeType, reverseOrder [1] }`
fn encode_sort_keys(attribute: &str, descending: bool) -> Result<Vec<u8>> {
    let mut key = vec![Tag::OctetString(OctetString {
        inner: attribute.as_bytes().to_vec(),
        ..Default::default()
    })];
    if descending {
        key.push(Tag::Boolean(Boolean {
            id: 1,
            class: TagClass::Context,
            inner: true,
        }));
    }
    let list = Tag::Sequence(Sequence {
        inner: vec![Tag::Sequence(Sequence {
            inner: key,
            ..Default::default()
        })],
        ..Default::default()
    })
    .into_structure();

    let mut buf = BytesMut::with_capacity(attribute.len() + 16);
    write::encode_into(&mut buf, list)?;
    Ok(buf.to_vec())
}
