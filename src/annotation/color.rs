//! Annotation color assignment over the tab10 palette.

use std::collections::HashMap;

use crate::annotation::Rgb;
use crate::constants::{PALETTE_SIZE, TAB10};

/// Palette color at an index (wrapping).
pub fn palette_color(index: usize) -> Rgb {
    Rgb::from(TAB10[index % PALETTE_SIZE])
}

/// Hands out palette colors, preferring ones not currently in use.
///
/// Availability is tracked per color with use counts, so releasing one of two
/// annotations sharing a color keeps that color taken.
#[derive(Debug, Clone, Default)]
pub struct ColorCycler {
    in_use: HashMap<Rgb, usize>,
    cursor: usize,
}

impl ColorCycler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next free palette color, scanning from the cursor.
    ///
    /// When all ten colors are taken the color at the cursor is reused.
    pub fn next_color(&mut self) -> Rgb {
        let free = (0..PALETTE_SIZE)
            .map(|offset| (self.cursor + offset) % PALETTE_SIZE)
            .find(|&idx| !self.is_taken(palette_color(idx)));

        let idx = free.unwrap_or(self.cursor % PALETTE_SIZE);
        if free.is_none() {
            log::debug!("Palette exhausted, reusing color {}", idx);
        }
        self.cursor = (idx + 1) % PALETTE_SIZE;

        let color = palette_color(idx);
        self.take(color);
        color
    }

    /// Mark a color as used by one more annotation.
    pub fn take(&mut self, color: Rgb) {
        *self.in_use.entry(color).or_insert(0) += 1;
    }

    /// Return one use of a color to the pool.
    pub fn release(&mut self, color: Rgb) {
        if let Some(count) = self.in_use.get_mut(&color) {
            *count -= 1;
            if *count == 0 {
                self.in_use.remove(&color);
            }
        }
    }

    /// Seed the taken set with colors already in use.
    pub fn register_existing(&mut self, colors: impl IntoIterator<Item = Rgb>) {
        for color in colors {
            self.take(color);
        }
    }

    pub fn is_taken(&self, color: Rgb) -> bool {
        self.in_use.contains_key(&color)
    }

    /// Number of palette colors not in use.
    pub fn free_count(&self) -> usize {
        (0..PALETTE_SIZE)
            .filter(|&idx| !self.is_taken(palette_color(idx)))
            .count()
    }

    /// Forget all uses and restart at the first palette color.
    pub fn reset(&mut self) {
        self.in_use.clear();
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycles_through_palette() {
        let mut cycler = ColorCycler::new();
        let colors: Vec<Rgb> = (0..PALETTE_SIZE).map(|_| cycler.next_color()).collect();
        for (idx, color) in colors.iter().enumerate() {
            assert_eq!(*color, palette_color(idx));
        }
        assert_eq!(cycler.free_count(), 0);

        // All taken: reuse starts again at color 0
        assert_eq!(cycler.next_color(), palette_color(0));
    }

    #[test]
    fn test_released_color_is_reissued() {
        let mut cycler = ColorCycler::new();
        let colors: Vec<Rgb> = (0..PALETTE_SIZE).map(|_| cycler.next_color()).collect();
        cycler.release(colors[3]);
        assert_eq!(cycler.next_color(), colors[3]);
    }

    #[test]
    fn test_register_existing_skips_taken() {
        let mut cycler = ColorCycler::new();
        let existing = vec![palette_color(0), palette_color(1), palette_color(4)];
        cycler.register_existing(existing.clone());

        let issued: Vec<Rgb> = (0..7).map(|_| cycler.next_color()).collect();
        assert!(issued.iter().all(|c| !existing.contains(c)));
        assert_eq!(cycler.free_count(), 0);
    }

    #[test]
    fn test_use_counts() {
        let mut cycler = ColorCycler::new();
        let red = palette_color(3);
        cycler.take(red);
        cycler.take(red);
        cycler.release(red);
        assert!(cycler.is_taken(red));
        cycler.release(red);
        assert!(!cycler.is_taken(red));
        // Releasing an unknown color is a no-op
        cycler.release(Rgb::new(1, 2, 3));
    }

    #[test]
    fn test_reset() {
        let mut cycler = ColorCycler::new();
        cycler.next_color();
        cycler.next_color();
        cycler.reset();
        assert_eq!(cycler.free_count(), PALETTE_SIZE);
        assert_eq!(cycler.next_color(), palette_color(0));
    }
}
