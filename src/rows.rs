// src/rows.rs - Reassemble OCR words into visual lines

use serde::Serialize;

use crate::ocr::OcrWord;

/// One visual line of text, words ordered left to right
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextLine {
    pub words: Vec<OcrWord>,
    /// Mean y-centre of the words
    pub y_centre: f64,
}

impl TextLine {
    fn from_words(mut words: Vec<OcrWord>) -> Self {
        words.sort_by_key(|w| w.left);
        let y_centre = words.iter().map(|w| w.centre().1).sum::<f64>() / words.len().max(1) as f64;
        Self { words, y_centre }
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(|w| w.text.as_str())
    }

    /// Words joined with single spaces
    pub fn text(&self) -> String {
        self.tokens().collect::<Vec<_>>().join(" ")
    }
}

/// Group words whose y-centres are density-connected within `tolerance`.
///
/// This is DBSCAN on the y-centres with `min_samples = 2`: a word with at
/// least one other centre within `tolerance` is a core word, clusters grow
/// through core words, and words reached by no cluster form lines of their
/// own. Lines come back ordered top to bottom.
pub fn group_rows(words: &[OcrWord], tolerance: f64) -> Vec<TextLine> {
    const MIN_SAMPLES: usize = 2;

    let centres: Vec<f64> = words.iter().map(|w| w.centre().1).collect();
    let neighbours = |i: usize| -> Vec<usize> {
        (0..centres.len())
            .filter(|&j| (centres[i] - centres[j]).abs() <= tolerance)
            .collect()
    };

    let mut cluster_of: Vec<Option<usize>> = vec![None; words.len()];
    let mut cluster_count = 0;

    for i in 0..words.len() {
        if cluster_of[i].is_some() {
            continue;
        }
        let seeds = neighbours(i);
        if seeds.len() < MIN_SAMPLES {
            continue;
        }

        let cluster = cluster_count;
        cluster_count += 1;
        cluster_of[i] = Some(cluster);

        let mut queue = seeds;
        while let Some(j) = queue.pop() {
            if cluster_of[j].is_some() {
                continue;
            }
            cluster_of[j] = Some(cluster);
            let reach = neighbours(j);
            if reach.len() >= MIN_SAMPLES {
                queue.extend(reach.into_iter().filter(|&k| cluster_of[k].is_none()));
            }
        }
    }

    let mut grouped: Vec<Vec<OcrWord>> = vec![Vec::new(); cluster_count];
    let mut lines = Vec::new();
    for (word, cluster) in words.iter().zip(&cluster_of) {
        match cluster {
            Some(c) => grouped[*c].push(word.clone()),
            None => lines.push(TextLine::from_words(vec![word.clone()])),
        }
    }
    lines.extend(grouped.into_iter().filter(|g| !g.is_empty()).map(TextLine::from_words));

    lines.sort_by(|a, b| {
        a.y_centre
            .total_cmp(&b.y_centre)
            .then_with(|| a.words.first().map(|w| w.left).cmp(&b.words.first().map(|w| w.left)))
    });
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, left: i32, top: i32) -> OcrWord {
        OcrWord::new(text, left, top, 20, 10, 90.0)
    }

    #[test]
    fn groups_words_by_row() {
        let words = vec![
            word("45.3", 80, 31),
            word("Umb-PS", 10, 30),
            word("cm/s", 120, 30),
            word("Umb-HR", 10, 60),
            word("142", 80, 61),
            word("lonely", 10, 100),
        ];
        let lines = group_rows(&words, 3.0);

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].text(), "Umb-PS 45.3 cm/s");
        assert_eq!(lines[1].text(), "Umb-HR 142");
        assert_eq!(lines[2].text(), "lonely");
    }

    #[test]
    fn chains_through_core_words() {
        // 0 and 2 are 4 px apart, but both are within 3 px of 1
        let words = vec![word("a", 0, 10), word("b", 30, 12), word("c", 60, 14)];
        let lines = group_rows(&words, 3.0);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text(), "a b c");
    }

    #[test]
    fn isolated_words_stay_separate() {
        let words = vec![word("x", 0, 0), word("y", 0, 20)];
        let lines = group_rows(&words, 3.0);
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.words.len() == 1));
    }

    #[test]
    fn empty_input_gives_no_lines() {
        assert!(group_rows(&[], 3.0).is_empty());
    }
}
