//! Transcript / thumbnail alignment.
//!
//! Groups transcript fragments into viewer chunks whose span is bounded by the
//! thumbnail interval, measured from where each chunk began rather than on a
//! fixed grid, then maps every chunk to the inclusive range of thumbnails it
//! covers.

use crate::domain::{Item, TranscriptChunk, ViewerChunk};

/// Chunk being accumulated
struct OpenChunk {
    start: f64,
    end: f64,
    text: String,
}

impl OpenChunk {
    fn at(start: f64) -> Self {
        Self {
            start,
            end: start,
            text: String::new(),
        }
    }

    fn merge(&mut self, fragment: &TranscriptChunk) {
        let needs_space = !self.text.is_empty()
            && !self.text.ends_with(' ')
            && !fragment.text.starts_with(' ');
        if needs_space {
            self.text.push(' ');
        }
        self.text.push_str(&fragment.text);
        self.end = self.end.max(fragment.end());
    }
}

/// Align `transcript` (ordered by start) with `num_images` thumbnails taken
/// every `image_interval` seconds.
///
/// An empty transcript yields no chunks.
pub fn align(image_interval: f64, num_images: usize, transcript: &[TranscriptChunk]) -> Vec<ViewerChunk> {
    let Some(first) = transcript.first() else {
        return Vec::new();
    };

    let mut closed: Vec<OpenChunk> = Vec::new();
    let mut open = OpenChunk::at(first.start());
    let mut cursor = 0;

    while let Some(fragment) = transcript.get(cursor) {
        let boundary = open.start + image_interval;
        if fragment.start() > boundary {
            // Re-evaluate the same fragment against the new chunk
            let next = OpenChunk::at(fragment.start());
            closed.push(std::mem::replace(&mut open, next));
        } else {
            open.merge(fragment);
            cursor += 1;
        }
    }

    // Stretch the last chunk so it reaches the final thumbnail
    let last_image_time = num_images.saturating_sub(1) as f64 * image_interval;
    open.end = open.end.max(last_image_time);
    closed.push(open);

    let max_index = num_images.saturating_sub(1);
    closed
        .into_iter()
        .map(|chunk| ViewerChunk {
            images: [
                image_index((chunk.start / image_interval).ceil(), max_index),
                image_index((chunk.end / image_interval).floor(), max_index),
            ],
            timestamp: [chunk.start, chunk.end],
            text: chunk.text,
        })
        .collect()
}

/// Viewer chunks for a processed item
pub fn align_item(item: &Item, transcript: &[TranscriptChunk]) -> Vec<ViewerChunk> {
    align(item.images.interval, item.num_images(), transcript)
}

fn image_index(position: f64, max_index: usize) -> usize {
    if position <= 0.0 || position.is_nan() {
        0
    } else {
        (position as usize).min(max_index)
    }
}
