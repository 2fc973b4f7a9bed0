// One output frame. The renderer always mixes in stereo and the output
// callback spreads it over however many channels the device has.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StereoFrame {
    pub left: f32,
    pub right: f32,
}

impl StereoFrame {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn mono(sample: f32) -> Self {
        Self { left: sample, right: sample }
    }

    #[inline]
    pub fn scale(self, gain: f32) -> Self {
        Self { left: self.left * gain, right: self.right * gain }
    }
}

impl std::ops::AddAssign for StereoFrame {
    fn add_assign(&mut self, rhs: Self) {
        self.left += rhs.left;
        self.right += rhs.right;
    }
}
