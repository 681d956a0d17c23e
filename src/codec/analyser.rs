//! Frequency-magnitude snapshots for level visualisation
//!
//! Presentation clients render audio energy from a small fixed number
//! of byte-sized bins broadcast ~60 times per second. The analyser
//! keeps a sliding window of the most recent samples and computes a
//! binned magnitude spectrum with a fixed-size radix-2 FFT. All
//! buffers are preallocated, so an `update` never allocates and stays
//! well under a display frame.

/// FFT window length; must be a power of two
const WINDOW: usize = 256;

/// Sliding-window spectrum analyser with a fixed bin count
pub struct SpectrumAnalyser {
    /// Circular window of the most recent samples
    window: Vec<f32>,
    write_pos: usize,
    /// FFT scratch (real and imaginary parts)
    re: Vec<f32>,
    im: Vec<f32>,
    /// Precomputed Hann window coefficients
    hann: Vec<f32>,
    /// Latest binned magnitudes
    bins: Vec<u8>,
}

impl SpectrumAnalyser {
    /// Create an analyser producing `bin_count` magnitude bins
    ///
    /// `bin_count` must divide the spectrum half-length (128).
    pub fn new(bin_count: usize) -> Self {
        assert!(
            bin_count > 0 && (WINDOW / 2) % bin_count == 0,
            "bin count must divide the half-spectrum length"
        );
        let hann = (0..WINDOW)
            .map(|i| {
                let phase = std::f32::consts::TAU * i as f32 / WINDOW as f32;
                0.5 * (1.0 - phase.cos())
            })
            .collect();
        Self {
            window: vec![0.0; WINDOW],
            write_pos: 0,
            re: vec![0.0; WINDOW],
            im: vec![0.0; WINDOW],
            hann,
            bins: vec![0; bin_count],
        }
    }

    /// Feed live samples into the sliding window
    pub fn push(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.window[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % WINDOW;
        }
    }

    /// Recompute the binned spectrum from the current window
    pub fn update(&mut self) -> &[u8] {
        // Unroll the circular window into the scratch, oldest first
        for i in 0..WINDOW {
            let src = (self.write_pos + i) % WINDOW;
            self.re[i] = self.window[src] * self.hann[i];
            self.im[i] = 0.0;
        }

        fft_in_place(&mut self.re, &mut self.im);

        // Average magnitudes into bins over the first half of the
        // spectrum and scale into a byte.
        let half = WINDOW / 2;
        let per_bin = half / self.bins.len();
        let scale = 255.0 * 8.0 / WINDOW as f32;
        for (b, bin) in self.bins.iter_mut().enumerate() {
            let start = b * per_bin;
            let sum: f32 = (start..start + per_bin)
                .map(|i| (self.re[i] * self.re[i] + self.im[i] * self.im[i]).sqrt())
                .sum();
            *bin = ((sum / per_bin as f32) * scale).min(255.0) as u8;
        }

        &self.bins
    }

    /// Latest bins without recomputation
    pub fn bins(&self) -> &[u8] {
        &self.bins
    }

    /// Clear the window, returning the analyser to silence
    pub fn reset(&mut self) {
        self.window.fill(0.0);
        self.write_pos = 0;
        self.bins.fill(0);
    }
}

/// Iterative radix-2 Cooley-Tukey FFT over preallocated buffers
fn fft_in_place(re: &mut [f32], im: &mut [f32]) {
    let n = re.len();
    debug_assert!(n.is_power_of_two());

    // Bit-reversal permutation
    let bits = n.trailing_zeros();
    for i in 0..n {
        let j = (i as u32).reverse_bits() >> (32 - bits);
        let j = j as usize;
        if j > i {
            re.swap(i, j);
            im.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let angle = -std::f32::consts::TAU / len as f32;
        let (w_im, w_re) = angle.sin_cos();
        for start in (0..n).step_by(len) {
            let mut cur_re = 1.0f32;
            let mut cur_im = 0.0f32;
            for k in 0..len / 2 {
                let even = start + k;
                let odd = start + k + len / 2;
                let t_re = re[odd] * cur_re - im[odd] * cur_im;
                let t_im = re[odd] * cur_im + im[odd] * cur_re;
                re[odd] = re[even] - t_re;
                im[odd] = im[even] - t_im;
                re[even] += t_re;
                im[even] += t_im;
                let next_re = cur_re * w_re - cur_im * w_im;
                cur_im = cur_re * w_im + cur_im * w_re;
                cur_re = next_re;
            }
        }
        len <<= 1;
    }
}
