use std::{fs, sync::Arc};

use data::{
    Collator, DataLoader, ImageProcessor, Split, load_dataset,
    source::{CIFAR100_FINE_LABELS, RECORD_LEN},
};

fn write_split(path: &std::path::Path, labels: &[u8]) {
    let mut bytes = Vec::with_capacity(labels.len() * RECORD_LEN);
    for (i, &fine) in labels.iter().enumerate() {
        bytes.push(fine / 5);
        bytes.push(fine);
        bytes.extend(std::iter::repeat_n((i * 30) as u8, RECORD_LEN - 2));
    }
    fs::write(path, bytes).unwrap();
}

#[test]
fn cifar_files_to_batches() {
    let dir = tempfile::tempdir().unwrap();
    write_split(&dir.path().join("train.bin"), &[5, 5, 7, 99, 0]);
    write_split(&dir.path().join("test.bin"), &[1, 2]);

    let source = load_dataset("uoft-cs/cifar100", dir.path()).unwrap();
    let train = source.load(Split::Train).unwrap();
    let test = source.load(Split::Test).unwrap();

    assert_eq!(train.len(), 5);
    assert_eq!(test.labels(), vec![1, 2]);
    assert_eq!(train.num_classes(), CIFAR100_FINE_LABELS.len());
    assert_eq!(train.class_name(99), Some("worm"));

    let collator = Collator::new(Arc::new(ImageProcessor::default()));
    let mut loader = DataLoader::new(train, collator, 2, false).unwrap();

    let batches: Vec<_> = loader.batches().map(|b| b.unwrap()).collect();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0].pixel_values.dim(), (2, 3, 224, 224));
    assert_eq!(batches[2].pixel_values.dim(), (1, 3, 224, 224));
    assert_eq!(
        batches.iter().flat_map(|b| b.labels.clone()).collect::<Vec<_>>(),
        vec![5, 5, 7, 99, 0]
    );

    // A flat black image maps to -1 everywhere after normalizing.
    assert!(batches[0].pixel_values.slice(ndarray::s![0, .., .., ..]).iter().all(|&v| v == -1.));
}
