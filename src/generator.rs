//! Synthetic picture and tone sources for demo runs.

use std::f32::consts::PI;

use ffmpeg_mux::RawPicture;

/// Moving RGB24 sine/cosine pattern.
pub struct PictureGenerator {
    width: u32,
    height: u32,
    seed: f32,
}

impl PictureGenerator {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            seed: 1.0,
        }
    }

    pub fn next_picture(&mut self) -> RawPicture {
        let mut picture = RawPicture::new(self.width, self.height);
        self.fill(&mut picture);
        picture
    }

    /// Paints the next pattern into `picture`, which must be RGB24 at this size.
    pub fn fill(&mut self, picture: &mut RawPicture) {
        let (w, h) = (self.width as usize, self.height as usize);
        let area = (w * h) as f32;
        let stride = picture.stride();
        let data = picture.data_mut();
        for y in 0..h {
            let row = &mut data[y * stride..y * stride + w * 3];
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                px[0] = (255.0 * (y as f32 / area * self.seed * PI).sin()) as u8;
                px[1] = (255.0 * (x as f32 / area * self.seed * PI).cos()) as u8;
                px[2] = (255.0 * ((x + y) as f32 / area * self.seed * PI).sin()) as u8;
            }
        }
        self.seed += 2.2;
    }
}

const TONE_AMPLITUDE: f32 = 0x4FFF as f32;

/// s16 sine that sweeps from 700 Hz to 1500 Hz and wraps, one step per chunk.
pub struct ToneGenerator {
    min_nu: f32,
    max_nu: f32,
    step_nu: f32,
    nu: f32,
    phase: f32,
}

impl ToneGenerator {
    pub fn new(sample_rate: u32) -> Self {
        let per_hz = PI / sample_rate as f32;
        Self {
            min_nu: per_hz * 700.0,
            max_nu: per_hz * 1500.0,
            step_nu: per_hz * 10.0,
            nu: per_hz * 700.0,
            phase: 0.0,
        }
    }

    /// Next chunk of `samples` mono samples as little-endian bytes.
    pub fn next_chunk(&mut self, samples: usize) -> Vec<u8> {
        if self.nu > self.max_nu {
            self.nu = self.min_nu;
        }
        self.nu += self.step_nu;

        let mut out = Vec::with_capacity(samples * 2);
        for i in 0..samples {
            let s = ((i as f32 * self.nu + self.phase).sin() * TONE_AMPLITUDE) as i16;
            out.extend_from_slice(&s.to_le_bytes());
        }
        self.phase = (self.phase + self.nu * samples as f32) % (2.0 * PI);
        out
    }

    /// Same tone copied to every channel.
    pub fn next_interleaved(&mut self, samples: usize, channels: u16) -> Vec<u8> {
        let mono = self.next_chunk(samples);
        if channels <= 1 {
            return mono;
        }
        mono.chunks_exact(2)
            .flat_map(|s| std::iter::repeat_n([s[0], s[1]], channels as usize).flatten())
            .collect()
    }
}
