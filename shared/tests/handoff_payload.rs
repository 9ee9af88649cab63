/// Tests for the token-delimited handoff payload and wire codec integrity.
use std::net::SocketAddr;

use specter_shared::{
    decode, encode, CellAddr, CellMessage, EntityId, HandoffMessage, HandoffPayload, MessageError,
    EntityTypeId, SECTION_BASE, SECTION_CONTROLLERS, SECTION_PROPERTIES,
};

#[test]
fn sections_are_retrieved_by_token() {
    let mut payload = HandoffPayload::new();
    payload.push_section(SECTION_PROPERTIES, vec![1, 2, 3]);
    payload.push_section(SECTION_CONTROLLERS, vec![]);
    payload.push_section(SECTION_BASE, vec![9]);

    assert_eq!(payload.section(SECTION_PROPERTIES).unwrap(), &[1, 2, 3]);
    assert_eq!(payload.section(SECTION_CONTROLLERS).unwrap(), &[] as &[u8]);
    assert_eq!(payload.section(SECTION_BASE).unwrap(), &[9]);
}

#[test]
fn missing_section_is_a_stream_integrity_failure() {
    let mut payload = HandoffPayload::new();
    payload.push_section(SECTION_PROPERTIES, vec![1]);

    let result = payload.section(SECTION_BASE);
    assert!(matches!(
        result,
        Err(MessageError::MissingSection { ref token }) if token == SECTION_BASE
    ));
}

#[test]
fn handoff_message_survives_the_wire() {
    let mut payload = HandoffPayload::new();
    payload.push_section(SECTION_PROPERTIES, vec![4, 5]);
    payload.push_section(SECTION_CONTROLLERS, vec![6]);
    payload.push_section(SECTION_BASE, vec![7, 8]);
    let message = CellMessage::Handoff(HandoffMessage {
        entity_type: EntityTypeId(2),
        entity: EntityId(77),
        generation: 3,
        is_teleport: true,
        teleport_failure: false,
        payload,
    });

    let bytes = encode(&message).unwrap();
    let decoded = decode(&bytes).unwrap();
    assert_eq!(decoded, message);
    assert_eq!(decoded.entity(), EntityId(77));
    assert_eq!(decoded.generation(), Some(3));
    assert!(decoded.is_lifecycle());
}

#[test]
fn truncated_bytes_fail_to_decode() {
    let addr = CellAddr(SocketAddr::from(([127, 0, 1, 1], 1)));
    let message = CellMessage::GhostSetReal {
        entity: EntityId(5),
        generation: 1,
        owner: addr,
    };
    let bytes = encode(&message).unwrap();
    let result = decode(&bytes[..bytes.len() / 2]);
    assert!(matches!(result, Err(MessageError::Decode(_))));
}
