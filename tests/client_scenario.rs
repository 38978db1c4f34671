use dlms_engine::apdu::Apdu;
use dlms_engine::association::{
    AareApdu, ApplicationContextName, Conformance, InitiateRequest, InitiateResponse, RlreApdu,
};
use dlms_engine::cipher::{Envelope, KeyKind};
use dlms_engine::client::{ClientEngine, ClientState, DlmsSession};
use dlms_engine::descriptor::AttributeDescriptor;
use dlms_engine::get::{GetDataResult, GetRequest, GetResponse, GetResponseNormal};
use dlms_engine::settings::{Ciphering, Settings};
use dlms_engine::transport::Transport;
use dlms_engine::{Data, Error, ObisCode};
use tokio::sync::mpsc::UnboundedSender;

const KEY: [u8; 16] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F,
];
const AUTH_KEY: [u8; 16] = [
    0xD0, 0xD1, 0xD2, 0xD3, 0xD4, 0xD5, 0xD6, 0xD7, 0xD8, 0xD9, 0xDA, 0xDB, 0xDC, 0xDD, 0xDE, 0xDF,
];

/// A meter holding a single register.
struct Meter {
    ciphering: Option<Ciphering>,
    register: Data,
}

impl Meter {
    fn answer(&mut self, frame: &[u8]) -> Vec<u8> {
        match Apdu::decode(frame).unwrap() {
            Apdu::Aarq(aarq) => {
                let response = InitiateResponse::new(Conformance::DEFAULT_CLIENT, 0x0200).encode();
                let Some(ciphering) = self.ciphering.as_mut() else {
                    return AareApdu::accepted(ApplicationContextName::LogicalNameReferencing, response).encode();
                };
                let title = aarq.calling_ap_title.expect("calling AP title");
                ciphering.peer_system_title = Some(title.try_into().unwrap());
                let request = ciphering.open(&Envelope::decode(&aarq.user_information).unwrap()).unwrap();
                InitiateRequest::parse(&request).unwrap();

                let mut aare = AareApdu::accepted(
                    ApplicationContextName::LogicalNameReferencingWithCiphering,
                    ciphering.seal(&response, KeyKind::Global).unwrap(),
                );
                aare.responding_ap_title = Some(ciphering.system_title.to_vec());
                aare.encode()
            }
            Apdu::Ciphered(envelope) => {
                let plain = self.ciphering.as_mut().unwrap().open(&envelope).unwrap();
                let reply = self.answer(&plain);
                self.ciphering.as_mut().unwrap().seal(&reply, KeyKind::Global).unwrap()
            }
            Apdu::GetRequest(GetRequest::Normal(request)) => GetResponse::Normal(GetResponseNormal {
                invoke_id: request.invoke_id,
                result: GetDataResult::Data(self.register.clone()),
            })
            .encode(),
            Apdu::Rlrq(_) => RlreApdu::new().encode(),
            other => panic!("meter cannot answer {}", other.name()),
        }
    }
}

struct MeterLink {
    meter: Meter,
    reception: Option<UnboundedSender<Vec<u8>>>,
    open: bool,
}

impl MeterLink {
    fn new(meter: Meter) -> Self {
        Self { meter, reception: None, open: false }
    }
}

impl Transport for MeterLink {
    type Error = std::io::Error;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        self.open = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.open = false;
        self.reception = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.open
    }

    fn set_reception(&mut self, reception: UnboundedSender<Vec<u8>>) {
        self.reception = Some(reception);
    }

    async fn send(&mut self, apdu: &[u8]) -> Result<(), Self::Error> {
        let reply = self.meter.answer(apdu);
        if let Some(reception) = &self.reception {
            reception.send(reply).map_err(|_| std::io::ErrorKind::BrokenPipe)?;
        }
        Ok(())
    }
}

fn energy() -> AttributeDescriptor {
    AttributeDescriptor::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2)
}

#[tokio::test]
async fn associate_get_release() {
    let meter = Meter { ciphering: None, register: Data::DoubleLongUnsigned(123_456) };
    let client = ClientEngine::new(MeterLink::new(meter), Settings::default());

    client.connect().await.unwrap();
    client.associate().await.unwrap();
    assert_eq!(client.state(), ClientState::Associated);
    assert_eq!(client.with_session(|s| s.max_pdu_send()).await, 0x0100);

    assert_eq!(client.get(energy(), None).await.unwrap(), Data::DoubleLongUnsigned(123_456));

    client.close_association().await.unwrap();
    assert_eq!(client.state(), ClientState::Connected);
    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ClientState::Disconnected);
}

#[tokio::test]
async fn ciphered_association() {
    let meter = Meter {
        ciphering: Some(Ciphering::new(*b"METER001", KEY, AUTH_KEY)),
        register: Data::Structure(vec![Data::LongUnsigned(230), Data::Integer(-1)]),
    };
    let settings = Settings::builder().ciphering(Ciphering::new(*b"CLIENT01", KEY, AUTH_KEY)).build().unwrap();
    let client = ClientEngine::new(MeterLink::new(meter), settings);

    client.connect().await.unwrap();
    client.associate().await.unwrap();
    assert_eq!(
        client.get(energy(), None).await.unwrap(),
        Data::Structure(vec![Data::LongUnsigned(230), Data::Integer(-1)])
    );
    client.close_association().await.unwrap();

    let (own, peer) = client
        .with_session(|s| {
            let ciphering = s.ciphering().unwrap();
            (ciphering.invocation_counter, ciphering.peer_system_title)
        })
        .await;
    // AARQ, get-request and RLRQ were each sealed once.
    assert_eq!(own, 3);
    assert_eq!(peer, Some(*b"METER001"));
}

#[test]
fn aare_sealed_with_another_key() {
    let mut other_key = KEY;
    other_key[0] ^= 0xFF;
    let mut forged = Ciphering::new(*b"METER001", other_key, AUTH_KEY).with_peer_system_title(*b"CLIENT01");
    let response = InitiateResponse::new(Conformance::DEFAULT_CLIENT, 0x0200).encode();
    let mut aare = AareApdu::accepted(
        ApplicationContextName::LogicalNameReferencingWithCiphering,
        forged.seal(&response, KeyKind::Global).unwrap(),
    );
    aare.responding_ap_title = Some(b"METER001".to_vec());

    let settings = Settings::builder().ciphering(Ciphering::new(*b"CLIENT01", KEY, AUTH_KEY)).build().unwrap();
    let mut session = DlmsSession::new(settings);
    session.connected();
    session.build_aarq().unwrap();
    assert!(matches!(session.handle_aare(&aare.encode()), Err(Error::WrongKeys)));
    assert_eq!(session.state(), ClientState::Connected);
}
