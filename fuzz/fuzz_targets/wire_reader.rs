#![no_main]
use std::io::Cursor;

use libfuzzer_sys::fuzz_target;
use rfabric::protocol::messages::{
    FileChunkAck, FileContent, FileCreateSessionReply, FileCreateSessionRequest,
    GetServiceDescriptionReply, LocationChangePollReply, LocationChangePollRequest,
    NotificationConnectReply, NotificationConnectRequest, NotificationSyncReply,
    NotificationSyncRequest, PrefixResolveReply, ResolveServiceReply, ResolveServiceRequest,
    ServiceNotificationPage,
};
use rfabric::protocol::wire::ReadType;

fuzz_target!(|data: &[u8]| {
    driver(data).ok();
});

type Error = Box<dyn std::error::Error>;

fn driver(data: &[u8]) -> Result<(), Error> {
    let mut cursor = Cursor::new(data);

    let selector = i16::read(&mut cursor)?;

    match selector.rem_euclid(15) {
        0 => {
            GetServiceDescriptionReply::read(&mut cursor)?;
        }
        1 => {
            ResolveServiceRequest::read(&mut cursor)?;
        }
        2 => {
            ResolveServiceReply::read(&mut cursor)?;
        }
        3 => {
            PrefixResolveReply::read(&mut cursor)?;
        }
        4 => {
            ServiceNotificationPage::read(&mut cursor)?;
        }
        5 => {
            NotificationConnectRequest::read(&mut cursor)?;
        }
        6 => {
            NotificationConnectReply::read(&mut cursor)?;
        }
        7 => {
            NotificationSyncRequest::read(&mut cursor)?;
        }
        8 => {
            NotificationSyncReply::read(&mut cursor)?;
        }
        9 => {
            LocationChangePollRequest::read(&mut cursor)?;
        }
        10 => {
            LocationChangePollReply::read(&mut cursor)?;
        }
        11 => {
            FileCreateSessionRequest::read(&mut cursor)?;
        }
        12 => {
            FileCreateSessionReply::read(&mut cursor)?;
        }
        13 => {
            FileContent::read(&mut cursor)?;
        }
        _ => {
            FileChunkAck::read(&mut cursor)?;
        }
    }

    Ok(())
}
