use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use image::{Rgb, RgbImage};
use log::info;

use super::{DatasetSource, Split};
use crate::{DataErr, Dataset, Example, Result};

const SIDE: usize = 32;
const PLANE: usize = SIDE * SIDE;

/// The size in bytes of a record of the CIFAR-100 binary layout: a coarse label, a fine label
/// and the red, green and blue planes of a 32×32 image.
pub const RECORD_LEN: usize = 2 + 3 * PLANE;

/// The 100 fine classes of CIFAR-100, indexed by label.
pub const CIFAR100_FINE_LABELS: [&str; 100] = [
    "apple", "aquarium_fish", "baby", "bear", "beaver", "bed", "bee", "beetle", "bicycle",
    "bottle", "bowl", "boy", "bridge", "bus", "butterfly", "camel", "can", "castle",
    "caterpillar", "cattle", "chair", "chimpanzee", "clock", "cloud", "cockroach", "couch",
    "crab", "crocodile", "cup", "dinosaur", "dolphin", "elephant", "flatfish", "forest", "fox",
    "girl", "hamster", "house", "kangaroo", "keyboard", "lamp", "lawn_mower", "leopard", "lion",
    "lizard", "lobster", "man", "maple_tree", "motorcycle", "mountain", "mouse", "mushroom",
    "oak_tree", "orange", "orchid", "otter", "palm_tree", "pear", "pickup_truck", "pine_tree",
    "plain", "plate", "poppy", "porcupine", "possum", "rabbit", "raccoon", "ray", "road",
    "rocket", "rose", "sea", "seal", "shark", "shrew", "skunk", "skyscraper", "snail", "snake",
    "spider", "squirrel", "streetcar", "sunflower", "sweet_pepper", "table", "tank",
    "telephone", "television", "tiger", "tractor", "train", "trout", "tulip", "turtle",
    "wardrobe", "whale", "willow_tree", "wolf", "woman", "worm",
];

/// CIFAR-100 read from its binary distribution, `train.bin` and `test.bin`.
#[derive(Debug, Clone)]
pub struct Cifar100Source {
    root: PathBuf,
}

impl Cifar100Source {
    /// Creates a new `Cifar100Source`.
    ///
    /// # Arguments
    /// * `root` - The directory with the `.bin` files, or the one holding the extracted
    ///   `cifar-100-binary` directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn split_path(&self, split: Split) -> PathBuf {
        let file = format!("{split}.bin");
        let direct = self.root.join(&file);

        if direct.exists() {
            direct
        } else {
            self.root.join("cifar-100-binary").join(file)
        }
    }
}

impl DatasetSource for Cifar100Source {
    fn load(&self, split: Split) -> Result<Dataset> {
        let path = self.split_path(split);
        let examples = read_records(&path)?;

        info!("loaded {} cifar100 examples from the {split} split", examples.len());
        Dataset::new(examples, self.class_names())
    }

    fn class_names(&self) -> Arc<[String]> {
        CIFAR100_FINE_LABELS.iter().map(|s| s.to_string()).collect()
    }
}

fn read_records(path: &Path) -> Result<Vec<Example>> {
    let bytes = fs::read(path)?;
    parse_records(&bytes).map_err(|e| match e {
        DataErr::Format(msg) => DataErr::Format(format!("{}: {msg}", path.display())),
        e => e,
    })
}

/// Parses a buffer of CIFAR-100 binary records, the fine label of each record is the label
/// of its example.
///
/// # Returns
/// The examples or an error if the buffer isn't made of whole records.
pub fn parse_records(bytes: &[u8]) -> Result<Vec<Example>> {
    if bytes.len() % RECORD_LEN != 0 {
        return Err(DataErr::Format(format!(
            "{} bytes is not a whole amount of {RECORD_LEN} byte records",
            bytes.len()
        )));
    }

    bytes
        .chunks_exact(RECORD_LEN)
        .map(|record| {
            let label = record[1] as usize;
            if label >= CIFAR100_FINE_LABELS.len() {
                return Err(DataErr::LabelOutOfRange {
                    label,
                    num_classes: CIFAR100_FINE_LABELS.len(),
                });
            }

            let (r, rest) = record[2..].split_at(PLANE);
            let (g, b) = rest.split_at(PLANE);

            let image = RgbImage::from_fn(SIDE as u32, SIDE as u32, |x, y| {
                let i = y as usize * SIDE + x as usize;
                Rgb([r[i], g[i], b[i]])
            });

            Ok(Example::new(image, label))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(coarse: u8, fine: u8, rgb: [u8; 3]) -> Vec<u8> {
        let mut record = vec![coarse, fine];
        for value in rgb {
            record.extend(std::iter::repeat_n(value, PLANE));
        }
        record
    }

    #[test]
    fn fine_label_is_the_label() {
        let mut bytes = record(4, 30, [10, 20, 30]);
        bytes.extend(record(0, 99, [1, 2, 3]));

        let examples = parse_records(&bytes).unwrap();

        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].label, 30);
        assert_eq!(examples[1].label, 99);
        assert_eq!(examples[0].image.dimensions(), (32, 32));
        assert_eq!(examples[0].image.get_pixel(5, 7), &Rgb([10, 20, 30]));
    }

    #[test]
    fn planes_are_row_major() {
        let mut bytes = record(0, 0, [0, 0, 0]);
        // red value of pixel (x=3, y=1)
        bytes[2 + 32 + 3] = 200;

        let examples = parse_records(&bytes).unwrap();
        assert_eq!(examples[0].image.get_pixel(3, 1)[0], 200);
        assert_eq!(examples[0].image.get_pixel(1, 3)[0], 0);
    }

    #[test]
    fn truncated_file() {
        let bytes = record(0, 1, [0, 0, 0]);
        assert!(matches!(
            parse_records(&bytes[..RECORD_LEN - 1]),
            Err(DataErr::Format(_))
        ));
    }

    #[test]
    fn fine_label_out_of_range() {
        assert!(parse_records(&record(0, 100, [0, 0, 0])).is_err());
    }

    #[test]
    fn loads_from_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("cifar-100-binary");
        fs::create_dir(&nested).unwrap();
        fs::write(nested.join("test.bin"), record(1, 42, [9, 9, 9])).unwrap();

        let source = Cifar100Source::new(dir.path());
        let ds = source.load(Split::Test).unwrap();

        assert_eq!(ds.labels(), vec![42]);
        assert_eq!(ds.class_name(42), Some("leopard"));
        assert!(source.load(Split::Train).is_err());
    }

    #[test]
    fn class_names_are_sorted() {
        let mut sorted = CIFAR100_FINE_LABELS;
        sorted.sort();

        assert_eq!(sorted, CIFAR100_FINE_LABELS);
    }
}
