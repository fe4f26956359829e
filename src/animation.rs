//! Periodic channel modulation.
//!
//! Each animated channel follows `base + amplitude * sin(frequency * t + phase)`.
//! The functions here are the CPU mirror of what the demo shaders compute, so
//! the constants below must stay in sync with `shaders/pulse.frag` and
//! `shaders/sway.vert`.

/// A single sinusoidal channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Oscillator {
    pub base: f32,
    pub amplitude: f32,
    /// Angular frequency in radians per second.
    pub frequency: f32,
    /// Phase offset in radians.
    pub phase: f32,
}

impl Oscillator {
    pub const fn new(base: f32, amplitude: f32, frequency: f32, phase: f32) -> Self {
        Self {
            base,
            amplitude,
            frequency,
            phase,
        }
    }

    /// Evaluates the channel at elapsed time `t` (seconds).
    pub fn sample(&self, t: f32) -> f32 {
        self.base + self.amplitude * (self.frequency * t + self.phase).sin()
    }

    /// Closed interval the channel oscillates within.
    pub fn bounds(&self) -> (f32, f32) {
        let reach = self.amplitude.abs();
        (self.base - reach, self.base + reach)
    }
}

/// Three desynchronized color channels plus a constant alpha.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAnimation {
    pub channels: [Oscillator; 3],
    pub alpha: f32,
}

impl ColorAnimation {
    /// Color at elapsed time `t`. Pure in `t`; no state is carried between calls.
    pub fn evaluate(&self, t: f32) -> [f32; 4] {
        let [r, g, b] = self.channels.map(|c| c.sample(t));
        [r, g, b, self.alpha]
    }
}

/// Fragment color of the `pulse` demo.
pub const PULSE_COLOR: ColorAnimation = ColorAnimation {
    channels: [
        Oscillator::new(0.0, 1.0, 3.0, 0.5),
        Oscillator::new(0.0, 1.0, 3.0, 1.3),
        Oscillator::new(0.0, 1.0, 3.0, 2.5),
    ],
    alpha: 1.0,
};

/// Horizontal offset applied to every vertex in the `sway` demo.
pub const SWAY_OFFSET: Oscillator = Oscillator::new(0.0, 0.25, 2.0, 0.0);

/// Brightness factor applied to the interpolated vertex color in the `sway` demo.
pub const SWAY_BRIGHTNESS: Oscillator = Oscillator::new(0.75, 0.25, 1.5, 0.0);
