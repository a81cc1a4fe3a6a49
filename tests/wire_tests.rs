//! Wire-format round trips across the packet and SMessage layers.

mod common;

use common::*;
use vordr::dns::edns::EdnsOpt;
use vordr::dns::enums::{RecordType, ResponseCode};
use vordr::dns::DnsPacket;
use vordr::smessage::{SMessage, Section};

fn sample_response() -> DnsPacket {
    let key = ZoneKey::generate("example.ch");
    let mut packet = ResponseBuilder::new("www.example.ch", RecordType::A)
        .answer(signed_set(&key, vec![a_record("www.example.ch", [192, 0, 2, 7])]))
        .authority(signed_set(&key, vec![ns_record("example.ch", "ns1.example.ch")]))
        .build();
    packet.additionals.push(a_record("ns1.example.ch", [192, 0, 2, 8]));
    packet
}

#[test]
fn packet_wire_round_trip() {
    let packet = sample_response();
    let wire = packet.serialize().unwrap();
    let parsed = DnsPacket::parse(&wire).unwrap();

    assert_eq!(parsed.questions, packet.questions);
    assert_eq!(parsed.answers, packet.answers);
    assert_eq!(parsed.authorities, packet.authorities);
    assert_eq!(parsed.additionals, packet.additionals);
    assert_eq!(parsed.edns, packet.edns);
}

#[test]
fn smessage_round_trip_preserves_sections_and_opt() {
    let packet = sample_response();
    let message = SMessage::from_packet(&packet);

    // OPT is held outside the sections.
    assert!(message.edns.is_some());
    assert_eq!(message.count(Section::Answer), 2);
    assert_eq!(message.count(Section::Authority), 2);
    assert_eq!(message.count(Section::Additional), 1);

    let rebuilt = message.to_packet();
    let reparsed = DnsPacket::parse(&rebuilt.serialize().unwrap()).unwrap();
    assert_eq!(reparsed.answers.len(), packet.answers.len());
    assert_eq!(reparsed.authorities.len(), packet.authorities.len());
    assert_eq!(reparsed.additionals.len(), packet.additionals.len());
    assert_eq!(reparsed.edns, packet.edns);
}

#[test]
fn extended_rcode_spans_header_and_opt() {
    let mut packet = sample_response();
    packet.header.rcode = 0x05;
    packet.edns = Some(EdnsOpt {
        extended_rcode: 0x01,
        ..EdnsOpt::dnssec_ok(4096)
    });

    let message = SMessage::from_packet(&packet);
    assert_eq!(message.response_code(), ResponseCode::Unknown(0x15));
}

#[test]
fn truncated_wire_is_rejected() {
    let wire = sample_response().serialize().unwrap();
    assert!(DnsPacket::parse(&wire[..wire.len() - 4]).is_err());
    assert!(DnsPacket::parse(&wire[..8]).is_err());
}
