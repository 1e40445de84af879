// src/display/drivers/terminal/tests.rs

use super::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use test_log::test;

/// Records every `write` call so tests can check how output was chunked.
#[derive(Clone, Default)]
struct RecordingWriter {
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingWriter {
    fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }
}

impl Write for RecordingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes.lock().push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn digits_at(sink: &TerminalSink<RecordingWriter>, x: i32, y: i32) -> String {
    let offset = sink.digit_offset(x, y).unwrap();
    String::from_utf8(sink.screen_bytes()[offset..offset + COLOR_DIGITS_LEN].to_vec()).unwrap()
}

#[test]
fn it_should_point_every_offset_at_black_digits_initially() {
    let sink = TerminalSink::new(RecordingWriter::default(), 3, 4);
    for y in 0..4 {
        for x in 0..3 {
            assert_eq!(digits_at(&sink, x, y), BLACK_DIGITS, "pixel ({}, {})", x, y);
        }
    }
}

#[test]
fn it_should_place_upper_and_lower_pixels_behind_their_escapes() {
    let sink = TerminalSink::new(RecordingWriter::default(), 2, 2);
    let bytes = sink.screen_bytes();

    let top = sink.digit_offset(1, 0).unwrap();
    assert_eq!(&bytes[top - TOP_PIXEL_COLOR.len()..top], TOP_PIXEL_COLOR.as_bytes());

    let bottom = sink.digit_offset(1, 1).unwrap();
    assert_eq!(
        &bytes[bottom - BOTTOM_PIXEL_COLOR.len()..bottom],
        BOTTOM_PIXEL_COLOR.as_bytes()
    );
}

#[test]
fn it_should_round_odd_heights_up() {
    let sink = TerminalSink::new(RecordingWriter::default(), 2, 3);
    assert_eq!(sink.height(), 4);
    assert!(sink.digit_offset(0, 3).is_some());
    assert!(sink.digit_offset(0, 4).is_none());
}

#[test]
fn it_should_patch_only_the_addressed_digits() {
    let mut sink = TerminalSink::new(RecordingWriter::default(), 4, 4);
    let before = sink.screen_bytes().to_vec();

    sink.set_pixel(2, 3, Color::new(7, 42, 255));

    let offset = sink.digit_offset(2, 3).unwrap();
    let after = sink.screen_bytes();
    assert_eq!(after.len(), before.len());
    assert_eq!(&after[offset..offset + COLOR_DIGITS_LEN], b"007;042;255");
    assert_eq!(&after[..offset], &before[..offset]);
    assert_eq!(
        &after[offset + COLOR_DIGITS_LEN..],
        &before[offset + COLOR_DIGITS_LEN..]
    );
}

#[test]
fn it_should_ignore_out_of_range_pixels() {
    let mut sink = TerminalSink::new(RecordingWriter::default(), 2, 2);
    let before = sink.screen_bytes().to_vec();
    sink.set_pixel(-1, 0, Color::WHITE);
    sink.set_pixel(0, -1, Color::WHITE);
    sink.set_pixel(2, 0, Color::WHITE);
    sink.set_pixel(0, 2, Color::WHITE);
    assert_eq!(sink.screen_bytes(), &before[..]);
}

#[test]
fn it_should_write_the_full_buffer_once_with_only_the_white_pixel_changed() {
    let writer = RecordingWriter::default();
    let mut sink = TerminalSink::new(writer.clone(), 2, 2);
    let initial = sink.screen_bytes().to_vec();

    sink.set_pixel(0, 0, Color::WHITE);
    sink.send().unwrap();

    let writes = writer.writes();
    assert_eq!(writes.len(), 3, "clear, cursor-off, then one frame write");
    assert_eq!(writes[0], SCREEN_CLEAR);
    assert_eq!(writes[1], CURSOR_OFF);

    let frame = &writes[2];
    assert_eq!(frame.len(), initial.len());
    let offset = sink.digit_offset(0, 0).unwrap();
    assert_eq!(&frame[offset..offset + COLOR_DIGITS_LEN], b"255;255;255");
    for (i, (got, want)) in frame.iter().zip(initial.iter()).enumerate() {
        if !(offset..offset + COLOR_DIGITS_LEN).contains(&i) {
            assert_eq!(got, want, "byte {} changed", i);
        }
    }
}

#[test]
fn it_should_clear_the_screen_only_on_the_first_send() {
    let writer = RecordingWriter::default();
    let mut sink = TerminalSink::new(writer.clone(), 2, 2);
    sink.send().unwrap();
    sink.send().unwrap();

    let writes = writer.writes();
    assert_eq!(writes.len(), 4);
    assert_eq!(writes[3].len(), sink.screen_bytes().len());
}

#[test]
fn it_should_show_frame_rate_after_a_sane_interval() {
    let writer = RecordingWriter::default();
    let mut sink = TerminalSink::new(writer.clone(), 2, 2);
    let region = sink.fps_offset..sink.fps_offset + FPS_PLACEHOLDER.len();

    sink.send().unwrap();
    assert_eq!(&sink.screen_bytes()[region.clone()], FPS_PLACEHOLDER);

    thread::sleep(Duration::from_millis(5));
    sink.send().unwrap();
    let readout = String::from_utf8(sink.screen_bytes()[region].to_vec()).unwrap();
    assert!(readout.ends_with(" fps"), "unexpected readout {:?}", readout);
    let value: f64 = readout.trim_end_matches(" fps").trim().parse().unwrap();
    assert!(value > 0.0 && value < 2000.0, "implausible rate {}", value);
}

#[test]
fn it_should_blank_the_readout_for_long_gaps() {
    let mut sink = TerminalSink::new(RecordingWriter::default(), 2, 2);
    let now = Instant::now();
    sink.last_send = Some(now);
    sink.update_fps(now + Duration::from_secs(11));
    let region = sink.fps_offset..sink.fps_offset + FPS_PLACEHOLDER.len();
    assert_eq!(&sink.screen_bytes()[region.clone()], FPS_PLACEHOLDER);

    sink.update_fps(now + Duration::from_secs(11) + Duration::from_micros(100));
    assert_eq!(&sink.screen_bytes()[region], FPS_PLACEHOLDER);
}

#[test]
fn it_should_restore_the_cursor_on_drop_only_after_output() {
    let unused = RecordingWriter::default();
    drop(TerminalSink::new(unused.clone(), 2, 2));
    assert!(unused.writes().is_empty());

    let used = RecordingWriter::default();
    let mut sink = TerminalSink::new(used.clone(), 2, 2);
    sink.send().unwrap();
    drop(sink);
    let writes = used.writes();
    assert_eq!(writes[writes.len() - 2], SCREEN_CLEAR);
    assert_eq!(writes[writes.len() - 1], CURSOR_ON);
}
