use anyhow::{Context, Result};
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::annotation::{AnnotationState, PointAdded};
use crate::display::{DisplaySurface, STATUS_FINISHED, STATUS_HINT};
use crate::frame::Frame;
use crate::geometry::{Point, ScaleRatio};
use crate::render::Compositor;
use crate::video::{VideoError, VideoSource};

pub const DEFAULT_TARGET_HEIGHT: u32 = 900;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Idle,
    Advancing,
    Exhausted,
    Closed,
}

/// Owns everything the labeling loop mutates: the video source, the current
/// original and working frames, the annotation state and the advance flag.
pub struct Controller {
    source: Option<Box<dyn VideoSource>>,
    display: Box<dyn DisplaySurface>,
    compositor: Compositor,
    annotations: AnnotationState,
    target_height: u32,
    state: StepState,
    advance_requested: bool,
    frame_counter: u64,
    ratio: ScaleRatio,
    original: Option<Frame>,
    working: Option<RgbImage>,
    on_point: Option<Box<dyn FnMut(&PointAdded)>>,
}

impl Controller {
    pub fn new(
        source: Box<dyn VideoSource>,
        display: Box<dyn DisplaySurface>,
        compositor: Compositor,
        target_height: u32,
    ) -> Self {
        Self {
            source: Some(source),
            display,
            compositor,
            annotations: AnnotationState::new(),
            target_height,
            state: StepState::Idle,
            advance_requested: false,
            frame_counter: 0,
            ratio: ScaleRatio::IDENTITY,
            original: None,
            working: None,
            on_point: None,
        }
    }

    /// Called after every placed point, in addition to the log line.
    pub fn on_point(&mut self, hook: impl FnMut(&PointAdded) + 'static) {
        self.on_point = Some(Box::new(hook));
    }

    pub fn status_hint(&mut self) -> Result<()> {
        self.display.set_status(STATUS_HINT)
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn ratio(&self) -> ScaleRatio {
        self.ratio
    }

    pub fn annotations(&self) -> &AnnotationState {
        &self.annotations
    }

    pub fn original(&self) -> Option<&Frame> {
        self.original.as_ref()
    }

    /// Last image handed to the display surface.
    #[cfg(test)]
    pub fn working(&self) -> Option<&RgbImage> {
        self.working.as_ref()
    }

    pub fn advance_requested(&self) -> bool {
        self.advance_requested
    }

    pub fn request_advance(&mut self) {
        match self.state {
            StepState::Idle => self.advance_requested = true,
            state => debug!("advance ignored in {state:?}"),
        }
    }

    /// Scheduler callback. Fetches at most one frame, and only when an advance
    /// was requested since the last fetch.
    pub fn tick(&mut self) -> Result<()> {
        if self.state != StepState::Idle || !self.advance_requested {
            return Ok(());
        }
        self.state = StepState::Advancing;

        let fetched = match self.source.as_mut() {
            Some(source) => source.next_frame(),
            None => Ok(None),
        };
        let frame = match fetched {
            Ok(Some(frame)) => frame,
            Ok(None) => return self.finish(),
            Err(err @ VideoError::MalformedFrame { .. }) => {
                return Err(err).context("decoder produced an unusable frame");
            }
            Err(err) => {
                warn!("frame read failed, treating as end of stream: {err}");
                return self.finish();
            }
        };

        self.frame_counter += 1;
        let (resized, ratio) = frame.resize_to_height(self.target_height);
        self.ratio = ratio;
        info!(
            "frame {}: {}x{} -> {}x{} (ratio {:.4})",
            self.frame_counter,
            frame.width(),
            frame.height(),
            resized.width(),
            resized.height(),
            ratio.value()
        );
        self.original = Some(resized);
        self.render()?;
        self.advance_requested = false;
        self.state = StepState::Idle;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        info!("video finished after {} frames", self.frame_counter);
        self.advance_requested = false;
        self.state = StepState::Exhausted;
        self.display.set_status(STATUS_FINISHED)
    }

    pub fn click(&mut self, display: Point) -> Result<()> {
        if self.state == StepState::Closed {
            return Ok(());
        }
        if self.original.is_none() {
            let (click_x, click_y) = (display.x, display.y);
            debug!("click at ({}, {}) ignored, no frame loaded", click_x, click_y);
            return Ok(());
        }
        let added = self.annotations.add_point(display, self.ratio);
        debug!("cursor now {}", self.annotations.cursor());
        info!(
            "Point {} - x = {}, y = {}",
            added.index, added.source.x, added.source.y
        );
        if let Some(quad) = self.annotations.committed().first().filter(|_| added.committed) {
            info!("quadrilateral committed: {:?}", quad.source);
        }
        if let Some(hook) = self.on_point.as_mut() {
            hook(&added);
        }
        self.render()
    }

    /// Clears all annotation state and shows the bare original frame again.
    /// Also drops a pending advance request.
    pub fn reset(&mut self) -> Result<()> {
        if self.state == StepState::Closed {
            return Ok(());
        }
        self.annotations.reset();
        self.advance_requested = false;
        info!("annotations cleared");
        self.render()
    }

    /// Enters the terminal state and releases the video source.
    pub fn close(&mut self) {
        if self.state == StepState::Closed {
            return;
        }
        self.state = StepState::Closed;
        self.advance_requested = false;
        if self.source.take().is_some() {
            info!("video source released");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == StepState::Closed
    }

    fn render(&mut self) -> Result<()> {
        let Some(original) = self.original.as_ref() else {
            debug!("no frame loaded yet, nothing to render");
            return Ok(());
        };
        let pending = if self.annotations.has_pending_points() {
            self.annotations.pending_points()
        } else {
            &[]
        };
        let working = self
            .compositor
            .render(original, pending, self.annotations.committed());
        self.display.present(&working)?;
        self.working = Some(working);
        Ok(())
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    const GREEN: [u8; 3] = [0, 255, 0];

    #[derive(Default)]
    struct Log {
        fetches: usize,
        presented: Vec<RgbImage>,
        statuses: Vec<String>,
        dropped: usize,
    }

    struct MemorySource {
        frames: VecDeque<Result<Frame, VideoError>>,
        log: Rc<RefCell<Log>>,
    }

    impl VideoSource for MemorySource {
        fn next_frame(&mut self) -> Result<Option<Frame>, VideoError> {
            self.log.borrow_mut().fetches += 1;
            self.frames.pop_front().transpose()
        }
    }

    impl Drop for MemorySource {
        fn drop(&mut self) {
            self.log.borrow_mut().dropped += 1;
        }
    }

    struct RecordingSurface {
        log: Rc<RefCell<Log>>,
    }

    impl DisplaySurface for RecordingSurface {
        fn present(&mut self, frame: &RgbImage) -> Result<()> {
            self.log.borrow_mut().presented.push(frame.clone());
            Ok(())
        }

        fn set_status(&mut self, text: &str) -> Result<()> {
            self.log.borrow_mut().statuses.push(text.to_string());
            Ok(())
        }
    }

    fn solid(width: u32, height: u32, value: u8) -> Frame {
        Frame::from_bgr(width, height, vec![value; (width * height * 3) as usize]).unwrap()
    }

    fn controller_with(
        frames: Vec<Result<Frame, VideoError>>,
        target_height: u32,
    ) -> (Controller, Rc<RefCell<Log>>) {
        let log = Rc::new(RefCell::new(Log::default()));
        let source = MemorySource {
            frames: frames.into(),
            log: Rc::clone(&log),
        };
        let surface = RecordingSurface {
            log: Rc::clone(&log),
        };
        let controller = Controller::new(
            Box::new(source),
            Box::new(surface),
            Compositor::default(),
            target_height,
        );
        (controller, log)
    }

    #[test]
    fn tick_without_request_never_fetches() {
        let (mut controller, log) = controller_with(vec![Ok(solid(20, 10, 0))], 20);
        for _ in 0..5 {
            controller.tick().unwrap();
        }
        assert_eq!(log.borrow().fetches, 0);
        assert_eq!(controller.frame_counter(), 0);
    }

    #[test]
    fn repeated_requests_advance_one_frame() {
        let frames = vec![Ok(solid(20, 10, 1)), Ok(solid(20, 10, 2))];
        let (mut controller, log) = controller_with(frames, 20);
        controller.request_advance();
        controller.request_advance();
        controller.tick().unwrap();
        controller.tick().unwrap();

        assert_eq!(log.borrow().fetches, 1);
        assert_eq!(controller.frame_counter(), 1);
        assert!(!controller.advance_requested());
        assert_eq!(controller.state(), StepState::Idle);
    }

    #[test]
    fn scenario_two_frames_quad_persists_until_end_of_stream() {
        let frames = vec![Ok(solid(200, 100, 10)), Ok(solid(200, 100, 20))];
        let (mut controller, log) = controller_with(frames, 200);

        controller.request_advance();
        controller.tick().unwrap();
        let original = controller.original().unwrap();
        assert_eq!((original.width(), original.height()), (400, 200));
        assert_eq!(controller.ratio().value(), 2.0);

        for (x, y) in [(40, 40), (360, 40), (360, 160), (40, 160)] {
            controller.click(Point::new(x, y)).unwrap();
        }
        let committed = controller.annotations().committed();
        assert_eq!(committed.len(), 1);
        assert_eq!(
            committed[0].source,
            [
                Point::new(20, 20),
                Point::new(180, 20),
                Point::new(180, 80),
                Point::new(20, 80)
            ]
        );

        controller.request_advance();
        controller.tick().unwrap();
        assert_eq!(controller.frame_counter(), 2);
        let working = controller.working().unwrap();
        assert_eq!(working.get_pixel(40, 40).0, GREEN);
        assert_eq!(working.get_pixel(200, 40).0, GREEN);
        assert_eq!(working.get_pixel(200, 100).0, [20, 20, 20]);

        let presented_before = log.borrow().presented.len();
        controller.request_advance();
        controller.tick().unwrap();
        assert_eq!(controller.state(), StepState::Exhausted);
        assert_eq!(log.borrow().statuses.last().unwrap(), STATUS_FINISHED);
        assert_eq!(log.borrow().presented.len(), presented_before);
        assert_eq!(controller.working().unwrap().get_pixel(40, 40).0, GREEN);

        controller.request_advance();
        controller.tick().unwrap();
        assert_eq!(log.borrow().fetches, 3);
    }

    #[test]
    fn reset_mid_collection_starts_fresh_cycle() {
        let (mut controller, log) = controller_with(vec![Ok(solid(40, 20, 50))], 20);
        controller.request_advance();
        controller.tick().unwrap();

        controller.click(Point::new(5, 5)).unwrap();
        controller.click(Point::new(30, 5)).unwrap();
        controller.request_advance();
        controller.reset().unwrap();

        assert!(!controller.advance_requested());
        assert!(!controller.annotations().has_pending_points());
        assert_eq!(controller.annotations().cursor(), 0);
        let last = log.borrow().presented.last().unwrap().clone();
        assert!(last.pixels().all(|p| p.0 == [50, 50, 50]));

        controller.tick().unwrap();
        assert_eq!(log.borrow().fetches, 1);

        controller.click(Point::new(7, 7)).unwrap();
        assert_eq!(controller.annotations().pending_points(), &[Point::new(7, 7)]);
    }

    #[test]
    fn close_releases_source_once_and_stops_ticking() {
        let (mut controller, log) = controller_with(vec![Ok(solid(20, 10, 0))], 20);
        controller.request_advance();
        controller.close();
        controller.close();
        assert!(controller.is_closed());
        assert_eq!(log.borrow().dropped, 1);

        controller.tick().unwrap();
        assert_eq!(log.borrow().fetches, 0);
        drop(controller);
        assert_eq!(log.borrow().dropped, 1);
    }

    #[test]
    fn malformed_frame_is_fatal() {
        let frames = vec![Err(VideoError::MalformedFrame {
            width: 0,
            height: 0,
            len: 0,
        })];
        let (mut controller, _log) = controller_with(frames, 20);
        controller.request_advance();
        assert!(controller.tick().is_err());
    }

    #[test]
    fn read_failure_ends_stream() {
        let frames = vec![Err(VideoError::Read("corrupt packet".to_string()))];
        let (mut controller, _log) = controller_with(frames, 20);
        controller.request_advance();
        controller.tick().unwrap();
        assert_eq!(controller.state(), StepState::Exhausted);
    }

    #[test]
    fn clicks_before_first_frame_are_ignored() {
        let (mut controller, log) = controller_with(vec![Ok(solid(200, 100, 0))], 900);
        controller.click(Point::new(90, 90)).unwrap();
        assert!(log.borrow().presented.is_empty());
        assert_eq!(controller.annotations().cursor(), 0);
        assert!(!controller.annotations().has_pending_points());

        controller.request_advance();
        controller.tick().unwrap();
        let working = controller.working().unwrap();
        assert_ne!(working.get_pixel(90, 90).0, GREEN);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        controller.on_point(move |added| sink.borrow_mut().push((added.index, added.source)));
        controller.click(Point::new(90, 90)).unwrap();
        assert_eq!(*seen.borrow(), vec![(1, Point::new(10, 10))]);
    }

    #[test]
    fn lone_click_at_origin_is_not_drawn() {
        let (mut controller, _log) = controller_with(vec![Ok(solid(20, 10, 0))], 10);
        controller.request_advance();
        controller.tick().unwrap();
        controller.click(Point::new(0, 0)).unwrap();

        assert_eq!(controller.annotations().cursor(), 1);
        let working = controller.working().unwrap();
        assert_eq!(working.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(working.get_pixel(1, 1).0, [0, 0, 0]);
    }

    #[test]
    fn point_hook_sees_each_click() {
        let (mut controller, _log) = controller_with(vec![Ok(solid(20, 10, 0))], 20);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        controller.on_point(move |added| sink.borrow_mut().push(added.index));
        controller.request_advance();
        controller.tick().unwrap();
        for i in 0..5 {
            controller.click(Point::new(i, i)).unwrap();
        }
        assert_eq!(*seen.borrow(), vec![1, 2, 3, 4, 1]);
    }
}
