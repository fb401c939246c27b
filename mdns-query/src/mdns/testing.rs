//! Response packer used by tests to play the responder side.

use crate::mdns::message::{Record, RecordKind};

const TYPE_A: u16 = 1;
const TYPE_PTR: u16 = 12;
const TYPE_TXT: u16 = 16;
const TYPE_AAAA: u16 = 28;
const TYPE_SRV: u16 = 33;
const CLASS_IN: u16 = 1;
const TTL: u32 = 120;

fn push_name(buf: &mut Vec<u8>, name: &str) {
    for label in name.trim_end_matches('.').split('.') {
        debug_assert!(label.len() <= 63, "label too long: {label:?}");
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);
}

fn push_record(buf: &mut Vec<u8>, record: &Record) {
    let mut rdata = Vec::new();
    let typ = match &record.kind {
        RecordKind::Pointer(target) => {
            push_name(&mut rdata, target);
            TYPE_PTR
        }
        RecordKind::Service { target, port } => {
            rdata.extend_from_slice(&0u16.to_be_bytes());
            rdata.extend_from_slice(&0u16.to_be_bytes());
            rdata.extend_from_slice(&port.to_be_bytes());
            push_name(&mut rdata, target);
            TYPE_SRV
        }
        RecordKind::Text(fields) => {
            for field in fields {
                debug_assert!(field.len() <= 255, "TXT field too long: {field:?}");
                rdata.push(field.len() as u8);
                rdata.extend_from_slice(field.as_bytes());
            }
            if fields.is_empty() {
                rdata.push(0);
            }
            TYPE_TXT
        }
        RecordKind::A(ip) => {
            rdata.extend_from_slice(&ip.octets());
            TYPE_A
        }
        RecordKind::Aaaa(ip) => {
            rdata.extend_from_slice(&ip.octets());
            TYPE_AAAA
        }
    };

    push_name(buf, &record.name);
    buf.extend_from_slice(&typ.to_be_bytes());
    buf.extend_from_slice(&CLASS_IN.to_be_bytes());
    buf.extend_from_slice(&TTL.to_be_bytes());
    buf.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    buf.extend_from_slice(&rdata);
}

/// Encode an authoritative mDNS response with no question section
pub(crate) fn encode_response(answers: &[Record], additionals: &[Record]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&0u16.to_be_bytes());
    buf.extend_from_slice(&0x8400u16.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes());
    buf.extend_from_slice(&(answers.len() as u16).to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes());
    buf.extend_from_slice(&(additionals.len() as u16).to_be_bytes());

    for record in answers.iter().chain(additionals) {
        push_record(&mut buf, record);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mdns::message::decode;

    #[test]
    fn test_packed_response_decodes() {
        let answers = [Record::new(
            "_http._tcp.local",
            RecordKind::Pointer("node1._http._tcp.local".to_string()),
        )];
        let additionals = [
            Record::new(
                "node1._http._tcp.local",
                RecordKind::Service { target: "node1.local".to_string(), port: 8080 },
            ),
            Record::new("node1._http._tcp.local", RecordKind::Text(vec!["v=1".to_string(), "path=/".to_string()])),
            Record::new("node1.local", RecordKind::A([10, 0, 0, 5].into())),
            Record::new("node1.local", RecordKind::Aaaa("fe80::1".parse().unwrap())),
        ];

        let message = decode(&encode_response(&answers, &additionals)).unwrap();
        assert_eq!(message.answers, answers);
        assert_eq!(message.additionals, additionals);
    }

    #[test]
    #[should_panic(expected = "label too long")]
    fn test_oversized_label_panics() {
        let name = format!("{}.local", "x".repeat(64));
        encode_response(&[Record::new(name, RecordKind::A([10, 0, 0, 5].into()))], &[]);
    }
}
