// SPDX-License-Identifier: CEPL-1.0
//! Drives `FrameLoop` against a simulated GPU that tracks fence and
//! semaphore state and panics on any protocol violation.

use std::collections::VecDeque;

use anyhow::Result;
use vkframe_render::{
    AcquireOutcome, FrameDevice, FrameLoop, FrameSlot, FrameStatus, LifecycleState,
    PresentOutcome, RecreateReason, RenderError, SwapchainStatus, FRAME_LAG,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fence {
    Signaled,
    Unsignaled,
    Pending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Event {
    Wait(usize),
    Acquire(usize),
    Submit(usize, u32),
    Ownership(usize),
    Present(usize, u32),
    Recreate,
}

struct SimDevice {
    image_count: usize,
    fences: [Fence; FRAME_LAG],
    image_acquired: [bool; FRAME_LAG],
    draw_complete: [bool; FRAME_LAG],
    image_ownership: [bool; FRAME_LAG],
    /// (slot, image) of submissions the GPU has not finished yet.
    outstanding: VecDeque<(usize, u32)>,
    max_outstanding: usize,
    held_by_app: Vec<bool>,
    next_image: u32,
    forced_images: VecDeque<u32>,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    minimized_for: usize,
    minimized_returns: usize,
    separate: bool,
    events: Vec<Event>,
}

impl SimDevice {
    fn new(image_count: usize) -> Self {
        Self {
            image_count,
            fences: [Fence::Signaled; FRAME_LAG],
            image_acquired: [false; FRAME_LAG],
            draw_complete: [false; FRAME_LAG],
            image_ownership: [false; FRAME_LAG],
            outstanding: VecDeque::new(),
            max_outstanding: 0,
            held_by_app: vec![false; image_count],
            next_image: 0,
            forced_images: VecDeque::new(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            minimized_for: 0,
            minimized_returns: 0,
            separate: false,
            events: Vec::new(),
        }
    }

    fn retire(&mut self, slot: usize) {
        self.outstanding.retain(|&(s, _)| s != slot);
        self.fences[slot] = Fence::Signaled;
    }

    fn image_busy(&self, image: u32) -> bool {
        self.outstanding.iter().any(|&(_, i)| i == image)
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl FrameDevice for SimDevice {
    fn wait_frame(&mut self, slot: FrameSlot) -> Result<()> {
        let s = slot.index();
        self.events.push(Event::Wait(s));
        match self.fences[s] {
            Fence::Unsignaled => panic!("wait on {slot} would never return"),
            Fence::Pending => self.retire(s),
            Fence::Signaled => {}
        }
        Ok(())
    }

    fn reset_frame(&mut self, slot: FrameSlot) -> Result<()> {
        let s = slot.index();
        assert_eq!(self.fences[s], Fence::Signaled, "reset of a fence still in use");
        self.fences[s] = Fence::Unsignaled;
        Ok(())
    }

    fn acquire_next_image(&mut self, slot: FrameSlot) -> Result<AcquireOutcome> {
        let s = slot.index();
        self.events.push(Event::Acquire(s));
        if let Some(AcquireOutcome::OutOfDate) = self.acquire_script.front() {
            self.acquire_script.pop_front();
            return Ok(AcquireOutcome::OutOfDate);
        }
        let suboptimal = matches!(
            self.acquire_script.pop_front(),
            Some(AcquireOutcome::Acquired { suboptimal: true, .. })
        );
        assert!(!self.image_acquired[s], "image-acquired semaphore of {slot} still signaled");

        let image = match self.forced_images.pop_front() {
            Some(i) => i,
            None => {
                let i = self.next_image;
                self.next_image = (i + 1) % self.image_count as u32;
                i
            }
        };
        assert!(!self.held_by_app[image as usize], "image {image} acquired twice");
        self.held_by_app[image as usize] = true;
        self.image_acquired[s] = true;
        Ok(AcquireOutcome::Acquired { image, suboptimal })
    }

    fn update_frame_data(&mut self, image: u32, _slot: FrameSlot) -> Result<()> {
        assert!(!self.image_busy(image), "uniforms of image {image} written while GPU reads them");
        Ok(())
    }

    fn submit_frame(&mut self, image: u32, slot: FrameSlot) -> Result<()> {
        let s = slot.index();
        self.events.push(Event::Submit(s, image));
        assert_eq!(self.fences[s], Fence::Unsignaled, "submit with a signaled fence");
        assert!(self.image_acquired[s], "submit without an acquired image");
        assert!(!self.draw_complete[s], "draw-complete semaphore of {slot} still signaled");
        self.image_acquired[s] = false;
        self.draw_complete[s] = true;
        self.fences[s] = Fence::Pending;
        self.outstanding.push_back((s, image));
        self.max_outstanding = self.max_outstanding.max(self.outstanding.len());
        assert!(self.outstanding.len() <= FRAME_LAG, "more than FRAME_LAG frames in flight");
        Ok(())
    }

    fn separate_present_queue(&self) -> bool {
        self.separate
    }

    fn submit_ownership_transfer(&mut self, _image: u32, slot: FrameSlot) -> Result<()> {
        let s = slot.index();
        self.events.push(Event::Ownership(s));
        assert!(self.draw_complete[s], "ownership transfer before draw completed");
        assert!(!self.image_ownership[s]);
        self.draw_complete[s] = false;
        self.image_ownership[s] = true;
        Ok(())
    }

    fn present(&mut self, image: u32, slot: FrameSlot) -> Result<PresentOutcome> {
        let s = slot.index();
        self.events.push(Event::Present(s, image));
        let wait = if self.separate {
            &mut self.image_ownership[s]
        } else {
            &mut self.draw_complete[s]
        };
        assert!(*wait, "present would wait on an unsignaled semaphore");
        *wait = false;
        self.held_by_app[image as usize] = false;
        Ok(self
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }

    fn recreate_swapchain(&mut self) -> Result<SwapchainStatus> {
        self.events.push(Event::Recreate);
        for s in 0..FRAME_LAG {
            if self.fences[s] == Fence::Pending {
                self.retire(s);
            }
        }
        assert!(
            self.held_by_app.iter().all(|held| !held),
            "swapchain torn down while an image is still acquired"
        );
        assert!(self.image_acquired.iter().all(|sig| !sig));
        if self.minimized_for > 0 {
            self.minimized_for -= 1;
            self.minimized_returns += 1;
            return Ok(SwapchainStatus::Minimized);
        }
        self.held_by_app = vec![false; self.image_count];
        self.next_image = 0;
        Ok(SwapchainStatus::Ready {
            image_count: self.image_count,
        })
    }
}

fn ready_loop(device: &SimDevice) -> FrameLoop {
    let mut fl = FrameLoop::new();
    fl.device_ready().unwrap();
    fl.swapchain_created(SwapchainStatus::Ready {
        image_count: device.image_count,
    })
    .unwrap();
    fl
}

#[test]
fn frames_in_flight_never_exceed_frame_lag() {
    let mut dev = SimDevice::new(3);
    let mut fl = ready_loop(&dev);
    for n in 0..100 {
        assert_eq!(fl.frame_index().index(), n % FRAME_LAG);
        assert_eq!(fl.draw_frame(&mut dev).unwrap(), FrameStatus::Presented);
        assert_eq!(fl.state(), LifecycleState::SwapchainReady);
    }
    assert_eq!(dev.max_outstanding, FRAME_LAG);
    assert_eq!(fl.stats().frames_presented, 100);
    assert_eq!(fl.stats().recreations, 0);
}

#[test]
fn fence_is_waited_before_its_slot_is_reused() {
    let mut dev = SimDevice::new(4);
    let mut fl = ready_loop(&dev);
    for _ in 0..6 {
        fl.draw_frame(&mut dev).unwrap();
    }
    let waits: Vec<usize> = dev
        .events
        .iter()
        .filter_map(|e| match e {
            Event::Wait(s) => Some(*s),
            _ => None,
        })
        .collect();
    assert_eq!(waits, vec![0, 1, 0, 1, 0, 1]);
}

#[test]
fn out_of_date_acquire_rebuilds_before_next_acquire() {
    let mut dev = SimDevice::new(3);
    let mut fl = ready_loop(&dev);
    fl.draw_frame(&mut dev).unwrap();

    dev.acquire_script.push_back(AcquireOutcome::OutOfDate);
    let slot_before = fl.frame_index();
    assert_eq!(fl.draw_frame(&mut dev).unwrap(), FrameStatus::Recreated);
    assert_eq!(fl.frame_index(), slot_before, "skipped frame keeps its slot");
    assert_eq!(dev.events.last(), Some(&Event::Recreate));

    assert_eq!(fl.draw_frame(&mut dev).unwrap(), FrameStatus::Presented);
    let stats = fl.stats();
    assert_eq!(stats.frames_skipped, 1);
    assert_eq!(stats.recreations, 1);
    assert_eq!(stats.frames_presented, 2);
}

#[test]
fn skipped_acquire_leaves_fence_signaled() {
    let mut dev = SimDevice::new(3);
    let mut fl = ready_loop(&dev);
    dev.acquire_script.push_back(AcquireOutcome::OutOfDate);
    fl.draw_frame(&mut dev).unwrap();
    assert_eq!(dev.fences[0], Fence::Signaled);
    // The same slot is used again; waiting on it must not hang.
    fl.draw_frame(&mut dev).unwrap();
}

#[test]
fn stale_present_triggers_rebuild() {
    let mut dev = SimDevice::new(3);
    let mut fl = ready_loop(&dev);
    dev.present_script.push_back(PresentOutcome::OutOfDate);
    assert_eq!(fl.draw_frame(&mut dev).unwrap(), FrameStatus::Recreated);
    assert_eq!(fl.frame_index().index(), 1 % FRAME_LAG);
    assert_eq!(dev.events.last(), Some(&Event::Recreate));
    assert_eq!(fl.stats().frames_skipped, 1);
    assert_eq!(fl.state(), LifecycleState::SwapchainReady);
}

#[test]
fn suboptimal_acquire_presents_then_rebuilds() {
    let mut dev = SimDevice::new(3);
    let mut fl = ready_loop(&dev);
    dev.acquire_script.push_back(AcquireOutcome::Acquired {
        image: 0,
        suboptimal: true,
    });
    assert_eq!(fl.draw_frame(&mut dev).unwrap(), FrameStatus::Presented);
    let tail = &dev.events[dev.events.len() - 2..];
    assert!(matches!(tail, [Event::Present(0, _), Event::Recreate]));
    assert_eq!(fl.stats().frames_presented, 1);
    assert_eq!(fl.stats().recreations, 1);
}

#[test]
fn suboptimal_present_counts_as_presented() {
    let mut dev = SimDevice::new(2);
    let mut fl = ready_loop(&dev);
    dev.present_script.push_back(PresentOutcome::Suboptimal);
    assert_eq!(fl.draw_frame(&mut dev).unwrap(), FrameStatus::Presented);
    assert_eq!(fl.stats().frames_presented, 1);
    assert_eq!(fl.stats().recreations, 1);
}

#[test]
fn resize_rebuilds_before_acquire() {
    let mut dev = SimDevice::new(3);
    let mut fl = ready_loop(&dev);
    fl.draw_frame(&mut dev).unwrap();
    dev.events.clear();

    fl.invalidate(RecreateReason::Resized);
    assert_eq!(fl.draw_frame(&mut dev).unwrap(), FrameStatus::Presented);
    assert_eq!(dev.events[0], Event::Recreate);
    assert!(matches!(dev.events[1], Event::Wait(_)));
    assert!(matches!(dev.events[2], Event::Acquire(_)));
}

#[test]
fn minimized_window_suspends_until_restored() {
    let mut dev = SimDevice::new(3);
    let mut fl = ready_loop(&dev);
    fl.draw_frame(&mut dev).unwrap();

    dev.minimized_for = 3;
    fl.invalidate(RecreateReason::Resized);
    for _ in 0..3 {
        assert_eq!(fl.draw_frame(&mut dev).unwrap(), FrameStatus::Suspended);
        assert_eq!(fl.state(), LifecycleState::Recreating);
    }
    let acquires_while_minimized = dev.count(|e| matches!(e, Event::Acquire(_)));
    assert_eq!(acquires_while_minimized, 1);

    assert_eq!(fl.draw_frame(&mut dev).unwrap(), FrameStatus::Presented);
    assert_eq!(fl.state(), LifecycleState::SwapchainReady);
    assert_eq!(fl.stats().recreations, 1);
}

#[test]
fn minimized_at_startup_waits_for_extent() {
    let mut dev = SimDevice::new(3);
    dev.minimized_for = 1;
    let mut fl = FrameLoop::new();
    fl.device_ready().unwrap();
    fl.swapchain_created(SwapchainStatus::Minimized).unwrap();
    assert_eq!(fl.state(), LifecycleState::Recreating);

    assert_eq!(fl.draw_frame(&mut dev).unwrap(), FrameStatus::Suspended);
    assert_eq!(fl.draw_frame(&mut dev).unwrap(), FrameStatus::Presented);
}

#[test]
fn separate_present_queue_transfers_ownership_each_frame() {
    let mut dev = SimDevice::new(3);
    dev.separate = true;
    let mut fl = ready_loop(&dev);
    for _ in 0..10 {
        fl.draw_frame(&mut dev).unwrap();
    }
    assert_eq!(dev.count(|e| matches!(e, Event::Ownership(_))), 10);
    let submit_then_transfer = dev.events.windows(3).all(|w| match w {
        [Event::Submit(a, _), next, _] => *next == Event::Ownership(*a),
        _ => true,
    });
    assert!(submit_then_transfer);
}

#[test]
fn image_reused_across_slots_waits_for_previous_owner() {
    let mut dev = SimDevice::new(3);
    let mut fl = ready_loop(&dev);
    // Image 0 comes back immediately for the second slot while slot 0's
    // submission may still be reading its uniforms.
    dev.forced_images.extend([0, 0]);
    fl.draw_frame(&mut dev).unwrap();
    fl.draw_frame(&mut dev).unwrap();
    let waits_on_zero = dev.count(|e| *e == Event::Wait(0));
    assert_eq!(waits_on_zero, 2);
}

#[test]
fn drawing_before_swapchain_is_rejected() {
    let mut dev = SimDevice::new(3);
    let mut fl = FrameLoop::new();
    let err = fl.draw_frame(&mut dev).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RenderError>(),
        Some(RenderError::IllegalTransition { .. })
    ));
    assert!(dev.events.is_empty());
}

#[test]
fn out_of_range_image_index_is_an_error() {
    let mut dev = SimDevice::new(3);
    let mut fl = FrameLoop::new();
    fl.device_ready().unwrap();
    fl.swapchain_created(SwapchainStatus::Ready { image_count: 2 })
        .unwrap();
    dev.forced_images.push_back(2);
    let err = fl.draw_frame(&mut dev).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RenderError>(),
        Some(RenderError::ImageOutOfRange { index: 2, count: 2 })
    ));
}

/// Deterministic 64-bit LCG so long runs replay identically.
struct Lcg(u64);

impl Lcg {
    fn below(&mut self, n: u32) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 33) as u32) % n
    }
}

#[derive(Default)]
struct Injected {
    acquire_out_of_date: usize,
    present_out_of_date: usize,
}

fn run_mixed_cycles(separate: bool, seed: u64, frames: usize) {
    let mut rng = Lcg(seed);
    let mut dev = SimDevice::new(3);
    dev.separate = separate;
    let mut fl = ready_loop(&dev);
    let mut injected = Injected::default();
    let (mut presented, mut recreated, mut suspended) = (0usize, 0usize, 0usize);

    for _ in 0..frames {
        if dev.acquire_script.is_empty() {
            match rng.below(20) {
                0 => {
                    dev.acquire_script.push_back(AcquireOutcome::OutOfDate);
                    injected.acquire_out_of_date += 1;
                }
                1 => dev.acquire_script.push_back(AcquireOutcome::Acquired {
                    image: 0,
                    suboptimal: true,
                }),
                _ => {}
            }
        }
        if dev.present_script.is_empty() {
            match rng.below(20) {
                0 => {
                    dev.present_script.push_back(PresentOutcome::OutOfDate);
                    injected.present_out_of_date += 1;
                }
                1 => dev.present_script.push_back(PresentOutcome::Suboptimal),
                _ => {}
            }
        }
        if dev.forced_images.is_empty() && rng.below(10) == 0 {
            dev.forced_images.push_back(rng.below(dev.image_count as u32));
        }
        match rng.below(40) {
            0 => {
                dev.minimized_for = 1 + rng.below(3) as usize;
                fl.invalidate(RecreateReason::Resized);
            }
            1 => fl.invalidate(RecreateReason::Settings),
            2 => fl.invalidate(RecreateReason::Resized),
            _ => {}
        }

        match fl.draw_frame(&mut dev).unwrap() {
            FrameStatus::Presented => presented += 1,
            FrameStatus::Recreated => recreated += 1,
            FrameStatus::Suspended => suspended += 1,
        }
        let state = fl.state();
        assert!(
            state == LifecycleState::SwapchainReady || state == LifecycleState::Recreating,
            "frame ended in {state}"
        );
    }

    let acquire_ood = injected.acquire_out_of_date
        - dev
            .acquire_script
            .iter()
            .filter(|o| **o == AcquireOutcome::OutOfDate)
            .count();
    let present_ood = injected.present_out_of_date
        - dev
            .present_script
            .iter()
            .filter(|o| **o == PresentOutcome::OutOfDate)
            .count();

    let stats = fl.stats();
    assert!(dev.max_outstanding <= FRAME_LAG);
    assert_eq!(stats.frames_skipped, (acquire_ood + present_ood) as u64);
    let presents = dev.count(|e| matches!(e, Event::Present(..)));
    assert_eq!(presents as u64, stats.frames_presented + present_ood as u64);
    let rebuilds = dev.count(|e| *e == Event::Recreate) - dev.minimized_returns;
    assert_eq!(stats.recreations, rebuilds as u64);
    let transfers = dev.count(|e| matches!(e, Event::Ownership(_)));
    assert_eq!(transfers, if separate { presents } else { 0 });

    // Every path was taken, not just the happy one.
    assert!(presented > 0 && recreated > 0 && suspended > 0);
    assert!(acquire_ood > 0 && present_ood > 0 && dev.minimized_returns > 0);
    assert!(stats.frames_presented >= presented as u64);

    // Once the surface settles the loop is back to steady state.
    dev.acquire_script.clear();
    dev.present_script.clear();
    dev.forced_images.clear();
    dev.minimized_for = 0;
    for _ in 0..FRAME_LAG * 3 {
        assert_ne!(fl.draw_frame(&mut dev).unwrap(), FrameStatus::Recreated);
    }
    assert_eq!(fl.draw_frame(&mut dev).unwrap(), FrameStatus::Presented);
    assert_eq!(fl.state(), LifecycleState::SwapchainReady);
}

#[test]
fn long_mixed_recreate_cycles_keep_the_protocol() {
    run_mixed_cycles(false, 0x5eed_0001, 5000);
}

#[test]
fn long_mixed_recreate_cycles_with_separate_present_queue() {
    run_mixed_cycles(true, 0x5eed_0002, 5000);
}
