// src/composite/tests.rs

use super::*;
use crate::display::FrameSink;
use crate::frame::Frame;
use std::sync::Arc;
use std::thread;
use test_log::test;

const TIMEOUT: Duration = Duration::from_secs(45);

/// Collects every submitted frame.
#[derive(Default)]
struct CapturingSink {
    frames: Mutex<Vec<Frame>>,
}

impl CapturingSink {
    fn frames(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }
}

impl FrameSink for CapturingSink {
    fn submit(&self, frame: Frame) {
        self.frames.lock().push(frame);
    }
}

/// Keeps only the latest frame; the first submit stalls to widen the window
/// between merging and handing the frame over.
#[derive(Default)]
struct SlowFirstSubmit {
    stalled: std::sync::atomic::AtomicBool,
    latest: Mutex<Option<Frame>>,
}

impl FrameSink for SlowFirstSubmit {
    fn submit(&self, frame: Frame) {
        if !self.stalled.swap(true, std::sync::atomic::Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
        }
        *self.latest.lock() = Some(frame);
    }
}

fn snapshot(stack: &LayerStack) -> Vec<Vec<Option<Color>>> {
    (0..stack.layer_count())
        .map(|layer| {
            (0..stack.height() as i32)
                .flat_map(|y| (0..stack.width() as i32).map(move |x| (x, y)))
                .map(|(x, y)| stack.layer_pixel(layer, x, y))
                .collect()
        })
        .collect()
}

#[test]
fn it_should_start_all_transparent_and_merge_to_black() {
    let stack = LayerStack::new(4, 3, 16);
    assert_eq!(stack.layer_count(), 16);
    assert!((0..16).all(|l| stack.is_layer_empty(l)));
    assert_eq!(stack.merge(), Frame::filled(4, 3, BACKGROUND));
}

#[test]
fn it_should_show_a_written_pixel_in_the_merge() {
    let mut stack = LayerStack::new(4, 4, 16);
    stack.set_pixel(7, 2, 3, Color::GREEN);
    let merged = stack.merge();
    assert_eq!(merged.get(2, 3), Some(Color::GREEN));
    assert_eq!(merged.get(3, 2), Some(BACKGROUND));
}

#[test]
fn it_should_let_the_lower_layer_index_win() {
    let mut stack = LayerStack::new(4, 4, 16);
    stack.set_pixel(5, 1, 1, Color::BLUE);
    stack.set_pixel(0, 1, 1, Color::RED);
    assert_eq!(stack.merge().get(1, 1), Some(Color::RED));

    // Write order does not matter.
    let mut stack = LayerStack::new(4, 4, 16);
    stack.set_pixel(0, 1, 1, Color::RED);
    stack.set_pixel(5, 1, 1, Color::BLUE);
    assert_eq!(stack.merge().get(1, 1), Some(Color::RED));
}

#[test]
fn it_should_let_a_black_pixel_occlude_higher_layers() {
    let mut stack = LayerStack::new(2, 2, 4);
    stack.set_pixel(3, 0, 0, Color::WHITE);
    stack.set_pixel(1, 0, 0, Color::BLACK);
    assert_eq!(stack.merge().get(0, 0), Some(Color::BLACK));
    stack.clear_layer(1);
    assert_eq!(stack.merge().get(0, 0), Some(Color::WHITE));
}

#[test]
fn it_should_merge_identically_without_intervening_writes() {
    let mut stack = LayerStack::new(5, 5, 8);
    stack.set_pixel(3, 0, 0, Color::RED);
    stack.set_pixel(1, 4, 4, Color::BLUE);
    stack.write_frame(6, &Frame::filled(5, 5, Color::GREEN));
    assert_eq!(stack.merge(), stack.merge());
}

#[test]
fn it_should_ignore_out_of_range_writes() {
    let mut stack = LayerStack::new(4, 4, 16);
    stack.set_pixel(2, 1, 1, Color::RED);
    let before = snapshot(&stack);
    let last_update = stack.layers[2].last_update;

    stack.set_pixel(2, -1, -1, Color::WHITE);
    stack.set_pixel(2, 4, 0, Color::WHITE);
    stack.set_pixel(2, 0, 4, Color::WHITE);
    stack.set_pixel(16 + 5, 0, 0, Color::WHITE);
    stack.write_frame(16, &Frame::filled(4, 4, Color::WHITE));
    stack.clear_layer(99);

    assert_eq!(snapshot(&stack), before);
    assert_eq!(stack.layers[2].last_update, last_update);
}

#[test]
fn it_should_replace_a_whole_layer_with_write_frame() {
    let mut stack = LayerStack::new(3, 2, 4);
    stack.set_pixel(2, 0, 0, Color::RED);
    let mut frame = Frame::filled(3, 2, Color::BLUE);
    frame.set(2, 1, Color::BLACK);

    stack.write_frame(2, &frame);

    assert_eq!(stack.layer_pixel(2, 0, 0), Some(Color::BLUE));
    assert_eq!(stack.layer_pixel(2, 2, 1), Some(Color::BLACK));
    assert_eq!(stack.merge(), frame);
}

#[test]
fn it_should_ignore_frames_of_the_wrong_size() {
    let mut stack = LayerStack::new(3, 2, 4);
    stack.write_frame(1, &Frame::filled(2, 3, Color::BLUE));
    assert!(stack.is_layer_empty(1));
}

#[test]
fn it_should_reuse_the_output_frame_in_merge_into() {
    let mut stack = LayerStack::new(2, 2, 2);
    stack.set_pixel(1, 1, 0, Color::RED);
    let mut out = Frame::filled(2, 2, Color::WHITE);
    stack.merge_into(&mut out);
    assert_eq!(out, stack.merge());

    let mut wrong_size = Frame::new(5, 5);
    stack.merge_into(&mut wrong_size);
    assert_eq!(wrong_size, stack.merge());
}

#[test]
fn it_should_expire_only_layers_idle_past_the_timeout() {
    let mut stack = LayerStack::new(4, 4, 4);
    stack.set_pixel(1, 0, 0, Color::RED);
    stack.set_pixel(2, 1, 1, Color::BLUE);
    let written = Instant::now();

    assert_eq!(stack.expire_idle(written, TIMEOUT), 0);
    assert_eq!(stack.expire_idle(written + TIMEOUT / 2, TIMEOUT), 0);

    // Refresh layer 2 "later" by moving its timestamp forward.
    stack.layers[2].last_update = written + TIMEOUT;
    let later = written + TIMEOUT + Duration::from_secs(1);
    assert_eq!(stack.expire_idle(later, TIMEOUT), 1);
    assert!(stack.is_layer_empty(1));
    assert!(!stack.is_layer_empty(2));

    // Already-empty layers are not counted again.
    assert_eq!(stack.expire_idle(later, TIMEOUT), 0);
}

#[test]
fn scenario_a_pixel_ages_out_after_timeout() {
    let mut stack = LayerStack::new(4, 4, 2);
    stack.set_pixel(1, 1, 1, Color::RED);
    let t0 = stack.layers[1].last_update;

    let merged = stack.merge();
    for (x, y, color) in merged.iter() {
        let expected = if (x, y) == (1, 1) { Color::RED } else { Color::BLACK };
        assert_eq!(color, expected, "pixel ({}, {})", x, y);
    }

    stack.expire_idle(t0 + TIMEOUT + Duration::from_secs(1), TIMEOUT);
    assert_eq!(stack.merge().get(1, 1), Some(Color::BLACK));
    assert_eq!(stack.merge(), Frame::new(4, 4));
}

#[test]
fn compositor_present_submits_the_merge() {
    let layers = LayerStack::new(2, 2, 2).into_shared();
    let sink = Arc::new(CapturingSink::default());
    let compositor = Compositor::new(layers, sink.clone());
    assert_eq!((compositor.width(), compositor.height()), (2, 2));

    compositor.set_pixel(1, 0, 1, Color::GREEN);
    compositor.present();

    let mut expected = Frame::new(2, 2);
    expected.set(0, 1, Color::GREEN);
    assert_eq!(sink.frames(), vec![expected]);
}

#[test]
fn compositor_update_applies_a_batch_under_one_lock() {
    let layers = LayerStack::new(3, 1, 2).into_shared();
    let compositor = Compositor::new(layers.clone(), Arc::new(CapturingSink::default()));
    let defined = compositor.update(|stack| {
        for x in 0..3 {
            stack.set_pixel(0, x, 0, Color::BLUE);
        }
        (0..3).filter(|x| stack.layer_pixel(0, *x, 0).is_some()).count()
    });
    assert_eq!(defined, 3);
    assert_eq!(layers.lock().merge(), Frame::filled(3, 1, Color::BLUE));
}

#[test]
fn garbage_collector_clears_idle_layers_and_refreshes_output() {
    let layers = LayerStack::new(4, 4, 2).into_shared();
    let sink = Arc::new(CapturingSink::default());
    let compositor = Compositor::new(layers.clone(), sink.clone());

    compositor.set_pixel(1, 1, 1, Color::RED);
    compositor.present();
    let gc = compositor
        .start_garbage_collection(Duration::from_millis(50), Duration::from_millis(10))
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !layers.lock().is_layer_empty(1) {
        assert!(Instant::now() < deadline, "layer never expired");
        thread::sleep(Duration::from_millis(10));
    }
    drop(gc);

    let frames = sink.frames();
    assert_eq!(frames.first().and_then(|f| f.get(1, 1)), Some(Color::RED));
    assert_eq!(frames.last(), Some(&Frame::new(4, 4)));
}

#[test]
fn garbage_collector_keeps_layers_that_are_still_written() {
    let layers = LayerStack::new(2, 2, 1).into_shared();
    let compositor = Compositor::new(layers.clone(), Arc::new(CapturingSink::default()));
    let gc = compositor
        .start_garbage_collection(Duration::from_millis(200), Duration::from_millis(10))
        .unwrap();

    for _ in 0..20 {
        compositor.set_pixel(0, 0, 0, Color::RED);
        thread::sleep(Duration::from_millis(10));
    }
    assert!(!layers.lock().is_layer_empty(0));
    drop(gc);
}

#[test]
fn concurrent_producers_never_lose_pixels() {
    const WIDTH: usize = 32;
    let layers = LayerStack::new(WIDTH, 8, 8).into_shared();
    let compositor = Compositor::new(layers.clone(), Arc::new(CapturingSink::default()));

    let producers: Vec<_> = (0..8)
        .map(|layer| {
            let compositor = compositor.clone();
            thread::spawn(move || {
                for x in 0..WIDTH as i32 {
                    compositor.set_pixel(layer, x, layer as i32, Color::new(layer as u8, 1, 2));
                    compositor.present();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let merged = layers.lock().merge();
    for layer in 0..8 {
        for x in 0..WIDTH as i32 {
            assert_eq!(
                merged.get(x, layer as i32),
                Some(Color::new(layer as u8, 1, 2))
            );
        }
    }
}

#[test]
fn compositor_present_never_lets_an_older_merge_win() {
    let layers = LayerStack::new(2, 1, 1).into_shared();
    let sink = Arc::new(SlowFirstSubmit::default());
    let compositor = Compositor::new(layers.clone(), sink.clone());

    let first = {
        let compositor = compositor.clone();
        thread::spawn(move || {
            compositor.set_pixel(0, 0, 0, Color::RED);
            compositor.present();
        })
    };
    // Let the first presenter get into its slow submit.
    thread::sleep(Duration::from_millis(20));
    compositor.set_pixel(0, 1, 0, Color::BLUE);
    compositor.present();
    first.join().unwrap();

    let shown = sink.latest.lock().clone().unwrap();
    assert_eq!(shown, layers.lock().merge());
    assert_eq!(shown.pixels(), &[Color::RED, Color::BLUE]);
}
