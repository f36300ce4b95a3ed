use printlink_communication::binary::packet::{crc8, START_BYTE};
use printlink_communication::{PacketBuilder, PacketDecoder};
use proptest::prelude::*;

fn build(payload: &[u8]) -> Vec<u8> {
    payload[1..]
        .iter()
        .fold(PacketBuilder::new(payload[0]), |builder, b| builder.u8(*b))
        .build()
}

proptest! {
    #[test]
    fn prop_built_packets_decode(payload in prop::collection::vec(any::<u8>(), 1..=32)) {
        let bytes = build(&payload);
        prop_assert_eq!(bytes[0], START_BYTE);
        prop_assert_eq!(bytes[1] as usize, payload.len());
        prop_assert_eq!(bytes[bytes.len() - 1], crc8(&payload));

        let mut decoder = PacketDecoder::new();
        decoder.push(&bytes);
        let packet = decoder.next_packet().unwrap().unwrap();
        prop_assert_eq!(packet.code(), payload[0]);
        prop_assert_eq!(packet.args(), &payload[1..]);
        prop_assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn prop_single_bit_corruption_is_detected(
        payload in prop::collection::vec(any::<u8>(), 1..=32),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let mut bytes = build(&payload);
        let target = 2 + index.index(payload.len());
        bytes[target] ^= 1 << bit;

        let mut decoder = PacketDecoder::new();
        decoder.push(&bytes);
        prop_assert!(matches!(decoder.next_packet(), Some(Err(_))));
    }
}

#[test]
fn test_packets_split_across_reads() {
    let first = build(&[0x81, 0xDC, 0x00]);
    let second = build(&[0x81]);
    let mut stream = vec![0x00, 0x42];
    stream.extend(&first);
    stream.extend(&second);

    let mut decoder = PacketDecoder::new();
    let mut packets = Vec::new();
    for chunk in stream.chunks(3) {
        decoder.push(chunk);
        while let Some(result) = decoder.next_packet() {
            packets.push(result.unwrap());
        }
    }
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].arg_u16(0), Some(220));
    assert!(packets[1].args().is_empty());
}
