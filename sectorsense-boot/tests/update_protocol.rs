//! End-to-end update protocol tests through the command handler
//!
//! Frames go in exactly as they arrive off the bus; status frames come
//! back exactly as they would be transmitted.

use sectorsense_boot::commands::{preflight, BootError};
use sectorsense_boot::layout::{APP_START, FLASH_TOTAL_SIZE, PROTO_VERSION};
use sectorsense_boot::{Handler, Status};
use sectorsense_core::crc::Crc32;
use sectorsense_core::flash::MemFlash;

type DeviceFlash = MemFlash<{ FLASH_TOTAL_SIZE as usize }>;

const DEVICE_ID: u8 = 0x05;

fn start_frame(size: u32) -> Vec<u8> {
    let mut frame = vec![0x10];
    frame.extend_from_slice(&size.to_le_bytes());
    frame
}

fn data_frame(chunk: &[u8]) -> Vec<u8> {
    assert!(chunk.len() <= 7);
    let mut frame = vec![0x20];
    frame.extend_from_slice(chunk);
    frame
}

fn end_frame(crc: u32) -> Vec<u8> {
    let mut frame = vec![0x30];
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

fn expect_status(responses: &[[u8; 8]], status: Status, extra: u8) {
    assert_eq!(responses.len(), 1, "expected a single status frame");
    assert_eq!(responses[0][0], status.code());
    assert_eq!(responses[0][1], extra);
    assert_eq!(&responses[0][2..], &[0; 6]);
}

/// Push a whole image through the protocol in 7-byte CAN chunks.
fn upload(handler: &mut Handler, flash: &mut DeviceFlash, image: &[u8]) {
    let responses = handler.handle(flash, &start_frame(image.len() as u32));
    expect_status(&responses, Status::Ok, 0);

    for chunk in image.chunks(7) {
        let responses = handler.handle(flash, &data_frame(chunk));
        expect_status(&responses, Status::Ok, 0);
    }

    let responses = handler.handle(flash, &end_frame(Crc32::compute(image)));
    expect_status(&responses, Status::Ok, 0);
}

#[test]
fn check_reports_no_image_then_a_committed_one() {
    let mut flash = DeviceFlash::new();
    let mut handler = Handler::new(DEVICE_ID);

    // Before any transfer: valid_app = 0, size and CRC zero.
    let responses = handler.handle(&mut flash, &[0x02]);
    assert_eq!(responses.len(), 2);
    let summary = responses[0];
    assert_eq!(summary[0], Status::Ok.code());
    assert_eq!(summary[1], 0x20);
    assert_eq!(summary[2], 0, "valid_app must be 0");
    assert_eq!(&summary[4..8], &0u32.to_le_bytes());

    let image: Vec<u8> = (0u8..200).map(|i| i.wrapping_mul(7)).collect();
    upload(&mut handler, &mut flash, &image);

    // After the transfer: valid_app = 1 with matching size and CRC.
    let responses = handler.handle(&mut flash, &[0x02]);
    let summary = responses[0];
    assert_eq!(summary[2], 1, "valid_app must be 1");
    assert_eq!(&summary[4..8], &(image.len() as u32).to_le_bytes());

    let crc_frame = responses[1];
    assert_eq!(crc_frame[1], 0x21);
    assert_eq!(&crc_frame[2..6], &Crc32::compute(&image).to_le_bytes());
    assert_eq!(crc_frame[6], DEVICE_ID);
    assert_eq!(crc_frame[7], PROTO_VERSION);
}

#[test]
fn short_transfer_fails_at_end_with_crc_status() {
    let mut flash = DeviceFlash::new();
    let mut handler = Handler::new(DEVICE_ID);

    // Announce 256 bytes, deliver 38 (5 × 7 + 3).
    expect_status(&handler.handle(&mut flash, &start_frame(256)), Status::Ok, 0);
    let mut sent = Vec::new();
    for _ in 0..5 {
        expect_status(
            &handler.handle(&mut flash, &data_frame(&[0xA5; 7])),
            Status::Ok,
            0,
        );
        sent.extend_from_slice(&[0xA5; 7]);
    }
    expect_status(
        &handler.handle(&mut flash, &data_frame(&[0xA5; 3])),
        Status::Ok,
        0,
    );
    sent.extend_from_slice(&[0xA5; 3]);

    // A CRC matching the 38 delivered bytes still fails: the byte
    // count must match the announced size too.
    let responses = handler.handle(&mut flash, &end_frame(Crc32::compute(&sent)));
    expect_status(&responses, Status::Crc, 0);

    // The failed END closed the session.
    let responses = handler.handle(&mut flash, &data_frame(&[1, 2, 3]));
    expect_status(&responses, Status::State, 0);

    // A fresh START fully recovers.
    let image = [0x11u8; 64];
    upload(&mut handler, &mut flash, &image);
}

#[test]
fn bad_start_sizes_answer_range_errors() {
    let mut flash = DeviceFlash::new();
    let mut handler = Handler::new(DEVICE_ID);

    expect_status(&handler.handle(&mut flash, &start_frame(0)), Status::Range, 0);
    expect_status(
        &handler.handle(&mut flash, &start_frame(u32::MAX)),
        Status::Range,
        0,
    );
    // Neither opened a session.
    let responses = handler.handle(&mut flash, &data_frame(&[0]));
    expect_status(&responses, Status::State, 0);
}

#[test]
fn data_before_start_is_a_state_error() {
    let mut flash = DeviceFlash::new();
    let mut handler = Handler::new(DEVICE_ID);
    expect_status(
        &handler.handle(&mut flash, &data_frame(&[1, 2, 3])),
        Status::State,
        0,
    );
    expect_status(&handler.handle(&mut flash, &end_frame(0)), Status::State, 0);
}

#[test]
fn truncated_and_unknown_frames() {
    let mut flash = DeviceFlash::new();
    let mut handler = Handler::new(DEVICE_ID);

    // START with a short size word.
    expect_status(&handler.handle(&mut flash, &[0x10, 1, 2]), Status::Generic, 0);
    // Unknown opcode answers the protocol's deliberate default.
    expect_status(&handler.handle(&mut flash, &[0x99]), Status::Generic, 0xFF);
    // The excluded I2C-bridge opcodes land in the same arm.
    expect_status(&handler.handle(&mut flash, &[0x52, 0x21, 4]), Status::Generic, 0xFF);
    // An empty frame produces no response at all.
    assert!(handler.handle(&mut flash, &[]).is_empty());
}

#[test]
fn flash_failure_during_data_aborts_with_generic_status() {
    let mut flash = DeviceFlash::new();
    let mut handler = Handler::new(DEVICE_ID);

    expect_status(&handler.handle(&mut flash, &start_frame(64)), Status::Ok, 0);
    flash.fail_program_at(APP_START);

    // 8 bytes fill a full staging word, forcing the failing program.
    expect_status(
        &handler.handle(&mut flash, &data_frame(&[0; 7])),
        Status::Ok,
        0,
    );
    let responses = handler.handle(&mut flash, &data_frame(&[0; 7]));
    expect_status(&responses, Status::Generic, 2);

    // Session aborted; a new START succeeds.
    expect_status(
        &handler.handle(&mut flash, &data_frame(&[0; 4])),
        Status::State,
        0,
    );
    expect_status(&handler.handle(&mut flash, &start_frame(64)), Status::Ok, 0);
}

#[test]
fn ping_answers_pong_and_latches_stay_request() {
    let mut flash = DeviceFlash::new();
    let mut handler = Handler::new(DEVICE_ID);

    let responses = handler.handle(&mut flash, &[0x01]);
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0][0], Status::Ok.code());
    assert_eq!(responses[0][1], 0x01);
    assert_eq!(&responses[1][0..4], b"PONG");
    assert_eq!(responses[1][4], DEVICE_ID);
    assert_eq!(responses[1][6], 0, "stay flag not set yet");
    assert!(!handler.stay_in_bootloader());

    let responses = handler.handle(&mut flash, &[0x01, 0x42]);
    assert_eq!(responses[1][6], 1);
    assert!(handler.stay_in_bootloader());
}

#[test]
fn boot_request_and_boot_status_round_trip() {
    let mut flash = DeviceFlash::new();
    let mut handler = Handler::new(DEVICE_ID);

    // No jump attempted yet: BOOT_STATUS reports 0.
    expect_status(&handler.handle(&mut flash, &[0x41]), Status::Ok, 0);

    let responses = handler.handle(&mut flash, &[0x40]);
    expect_status(&responses, Status::Ok, 0x40);
    assert!(handler.take_boot_request());
    assert!(!handler.take_boot_request(), "request is one-shot");

    // The outer loop records the jump failure; BOOT_STATUS reports it.
    handler.set_last_boot_error(Some(BootError::AppInvalid));
    expect_status(
        &handler.handle(&mut flash, &[0x41]),
        Status::Ok,
        BootError::AppInvalid.code(),
    );
}

#[test]
fn startup_frame_reflects_image_validity() {
    let mut flash = DeviceFlash::new();
    let mut handler = Handler::new(DEVICE_ID);

    let frame = handler.startup_frame(&flash, 0x1C);
    assert_eq!(&frame[0..4], b"BLST");
    assert_eq!(frame[4], DEVICE_ID);
    assert_eq!(frame[5], PROTO_VERSION);
    assert_eq!(frame[6] & 1, 0, "no valid app on blank flash");
    assert_eq!(frame[7], 0x1C);

    let image = [0x42u8; 32];
    upload(&mut handler, &mut flash, &image);
    let frame = handler.startup_frame(&flash, 0x1C);
    assert_eq!(frame[6] & 1, 1);
}

#[test]
fn preflight_checks_the_vector_table() {
    let mut flash = DeviceFlash::new();
    let mut handler = Handler::new(DEVICE_ID);

    assert_eq!(preflight(&flash), Err(BootError::AppInvalid));

    // Build an image with a plausible vector table: SP at the top of
    // SRAM1, entry just past the vector table with the thumb bit.
    let mut image = vec![0u8; 64];
    image[0..4].copy_from_slice(&0x2000_C000u32.to_le_bytes());
    image[4..8].copy_from_slice(&(APP_START + 0x41).to_le_bytes());
    upload(&mut handler, &mut flash, &image);

    let vector = preflight(&flash).unwrap();
    assert_eq!(vector.stack_ptr, 0x2000_C000);
    assert_eq!(vector.entry, APP_START + 0x41);

    // Unaligned stack pointer.
    image[0..4].copy_from_slice(&0x2000_C002u32.to_le_bytes());
    upload(&mut handler, &mut flash, &image);
    assert_eq!(preflight(&flash), Err(BootError::StackAlign));

    // Stack pointer outside every RAM window.
    image[0..4].copy_from_slice(&0x3000_0000u32.to_le_bytes());
    upload(&mut handler, &mut flash, &image);
    assert_eq!(preflight(&flash), Err(BootError::StackRange));

    // Entry without the thumb bit.
    image[0..4].copy_from_slice(&0x2000_C000u32.to_le_bytes());
    image[4..8].copy_from_slice(&(APP_START + 0x40).to_le_bytes());
    upload(&mut handler, &mut flash, &image);
    assert_eq!(preflight(&flash), Err(BootError::EntryRange));
}
