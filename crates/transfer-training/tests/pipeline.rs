use std::path::Path;

use burn::backend::Autodiff;
use burn::tensor::Tensor;
use burn_ndarray::NdArray;
use image::{Rgb, RgbImage};
use transfer_core::{Architecture, DataSplit, Error, Mode, TrainingConfig};
use transfer_dataset::{BatchLoader, ClassMapping, ImageFolder, ImageSample, SplitLoaders, Transform};
use transfer_training::{
    adam, evaluate, run, validate, Checkpoint, Console, Trainer, TrainerConfig, TransferModel,
};

type TestBackend = Autodiff<NdArray>;

const CLASSES: [&str; 2] = ["daisy", "tulip"];

fn write_split(root: &Path, split: DataSplit, per_class: usize) {
    for (c, class) in CLASSES.iter().enumerate() {
        let dir = root.join(split.dir_name()).join(class);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..per_class {
            let base = if c == 0 { 40 } else { 200 };
            RgbImage::from_fn(80, 72, |x, y| {
                Rgb([base, ((x + y) as u8).wrapping_add(i as u8), (i * 10) as u8])
            })
            .save(dir.join(format!("{class}_{i}.png")))
            .unwrap();
        }
    }
}

fn write_dataset(root: &Path) {
    for split in [DataSplit::Train, DataSplit::Valid, DataSplit::Test] {
        write_split(root, split, 10);
    }
}

fn small_config(root: &Path) -> TrainingConfig {
    let mut config = TrainingConfig::default();
    config.data.data_dir = root.join("flowers");
    config.data.image_size = 64;
    config.data.resize_size = 72;
    config.data.batch_size = 8;
    config.model.architecture = Architecture::AlexNet;
    config.model.hidden_units = 64;
    config.model.hidden_tail = [32, 16];
    config.training.epochs = 1;
    config.training.print_every = 1000;
    config.training.show_progress = false;
    config.output.checkpoint_path = root.join("out").join("checkpoint.json");
    config
}

#[test]
fn test_single_epoch_run_without_validation() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path());
    write_dataset(&config.data.data_dir);

    let mut console = Console::new(Vec::new());
    let summary = run::<TestBackend, _>(&config, &Default::default(), &mut console).unwrap();
    let output = String::from_utf8(console.into_inner()).unwrap();

    assert_eq!(output.matches("Training starting").count(), 1);
    assert_eq!(output.matches("Valid accuracy").count(), 0);
    assert_eq!(output.matches("Accuracy on test images is:").count(), 1);
    assert_eq!(output.matches("Training completed!!").count(), 1);

    assert_eq!(summary.state.steps, 3);
    assert!(summary.state.history.is_empty());
    assert_eq!(summary.test.total(), 20);
    assert!(summary.test.percent() <= 100);

    let checkpoint = Checkpoint::load(&summary.checkpoint_path).unwrap();
    assert_eq!(checkpoint.class_to_idx.len(), 2);
    assert_eq!(checkpoint.class_to_idx.get("daisy"), Some(&0));
    assert_eq!(checkpoint.idx_to_class.get(&1).map(String::as_str), Some("tulip"));
    assert_eq!(checkpoint.architecture, Architecture::AlexNet);
    assert_eq!(checkpoint.epochs, 1);
    assert_eq!(checkpoint.dropout, 0.5);
    assert_eq!(checkpoint, summary.checkpoint);
}

#[test]
fn test_validation_lines_follow_print_interval() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config(dir.path());
    config.training.epochs = 2;
    config.training.print_every = 2;
    write_dataset(&config.data.data_dir);

    let mut console = Console::new(Vec::new());
    let summary = run::<TestBackend, _>(&config, &Default::default(), &mut console).unwrap();
    let output = String::from_utf8(console.into_inner()).unwrap();

    // 3 steps per epoch, validation at steps 2, 4 and 6
    assert_eq!(summary.state.steps, 6);
    assert_eq!(output.matches("Valid accuracy").count(), 3);
    assert!(output.contains("Epoch 1/2.. Train loss: "));
    assert!(output.contains("Epoch 2/2.. Train loss: "));
    let steps: Vec<usize> = summary.state.history.iter().map(|r| r.step).collect();
    assert_eq!(steps, vec![2, 4, 6]);
    for record in &summary.state.history {
        assert!((0.0..=1.0).contains(&record.report.accuracy));
        assert_eq!(record.report.batches, 3);
        assert_eq!(record.report.examples, 20);
    }
}

#[test]
fn test_invalid_numbers_fail_before_data_is_read() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config(dir.path());
    config.training.learning_rate = 0.0;

    let mut console = Console::new(Vec::new());
    let result = run::<TestBackend, _>(&config, &Default::default(), &mut console);
    assert!(matches!(result, Err(Error::Config(_))));
    assert!(console.into_inner().is_empty());
}

#[test]
fn test_empty_architecture_is_a_configuration_error() {
    let mut config = TrainingConfig::default();
    assert!(matches!(config.set_architecture(""), Err(Error::Config(_))));
    assert!(matches!(config.set_architecture("resnet50"), Err(Error::Config(_))));
}

#[test]
fn test_missing_data_directory_is_a_data_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path());

    let mut console = Console::new(Vec::new());
    let result = run::<TestBackend, _>(&config, &Default::default(), &mut console);
    assert!(matches!(result, Err(Error::Data(_))));
    assert!(!config.output.checkpoint_path.exists());
}

#[test]
fn test_missing_validation_split_is_a_data_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path());
    write_split(&config.data.data_dir, DataSplit::Train, 2);
    write_split(&config.data.data_dir, DataSplit::Test, 2);

    let mut console = Console::new(Vec::new());
    let result = run::<TestBackend, _>(&config, &Default::default(), &mut console);
    assert!(matches!(result, Err(Error::Data(_))));
}

#[test]
fn test_extra_validation_class_fails_before_training() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config(dir.path());
    config.training.print_every = 1;
    write_dataset(&config.data.data_dir);
    let extra = config.data.split_dir(DataSplit::Valid).join("zinnia");
    std::fs::create_dir_all(&extra).unwrap();
    RgbImage::from_pixel(80, 72, Rgb([10, 220, 30]))
        .save(extra.join("zinnia_0.png"))
        .unwrap();

    let mut console = Console::new(Vec::new());
    let result = run::<TestBackend, _>(&config, &Default::default(), &mut console);
    assert!(matches!(result, Err(Error::Data(_))));
    assert!(console.into_inner().is_empty());
    assert!(!config.output.checkpoint_path.exists());
}

#[test]
fn test_validation_labels_beyond_head_are_a_data_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path());
    write_split(&config.data.data_dir, DataSplit::Valid, 2);
    let extra = config.data.split_dir(DataSplit::Valid).join("zinnia");
    std::fs::create_dir_all(&extra).unwrap();
    RgbImage::from_pixel(80, 72, Rgb([10, 220, 30]))
        .save(extra.join("zinnia_0.png"))
        .unwrap();

    let device = Default::default();
    let folder = ImageFolder::open(config.data.split_dir(DataSplit::Valid)).unwrap();
    assert_eq!(folder.num_classes(), 3);
    let mut valid = BatchLoader::<NdArray>::new(folder, Transform::eval(72, 64), 8, device);

    let model = TransferModel::<TestBackend>::assemble(&config.model, 2, &device).unwrap();
    assert!(matches!(validate(&model, &mut valid), Err(Error::Data(_))));
}

#[test]
fn test_empty_validation_loader_is_a_data_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path());
    write_dataset(&config.data.data_dir);

    let device = Default::default();
    let mut loaders =
        SplitLoaders::<NdArray>::open(&config.data, config.training.seed, &device).unwrap();
    let empty = ImageFolder::from_parts(
        config.data.split_dir(DataSplit::Valid),
        Vec::<ImageSample>::new(),
        ClassMapping::from_names(CLASSES),
    );
    let mut valid = BatchLoader::<NdArray>::new(empty, Transform::eval(72, 64), 8, device);

    let model = TransferModel::<TestBackend>::assemble(&config.model, 2, &device).unwrap();
    assert!(matches!(validate(&model, &mut valid), Err(Error::Data(_))));

    let mut trainer = Trainer::new(TrainerConfig::from_config(&config), adam::<TestBackend>());
    let mut console = Console::new(Vec::new());
    let result = trainer.fit(model, &mut loaders.train, &mut valid, &mut console);
    assert!(matches!(result, Err(Error::Data(_))));
    assert_eq!(trainer.state().steps, 0);
}

#[test]
fn test_training_leaves_backbone_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path());
    write_dataset(&config.data.data_dir);

    let device = Default::default();
    let mut loaders =
        SplitLoaders::<NdArray>::open(&config.data, config.training.seed, &device).unwrap();
    let model = TransferModel::<TestBackend>::assemble(&config.model, 2, &device).unwrap();

    let probe = Tensor::<NdArray, 4>::ones([1, 3, 64, 64], &device);
    let features_before = model.backbone().forward(probe.clone()).into_data().to_vec::<f32>().unwrap();
    let head_before = model.head().state_dict().unwrap();

    let mut trainer = Trainer::new(TrainerConfig::from_config(&config), adam::<TestBackend>());
    let mut console = Console::new(Vec::new());
    let model = trainer
        .fit(model, &mut loaders.train, &mut loaders.valid, &mut console)
        .unwrap();

    let features_after = model.backbone().forward(probe).into_data().to_vec::<f32>().unwrap();
    assert_eq!(features_before, features_after);
    assert_ne!(head_before, model.head().state_dict().unwrap());
    assert_eq!(model.mode(), Mode::Train);
}

#[test]
fn test_evaluation_is_repeatable() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path());
    write_dataset(&config.data.data_dir);

    let device = Default::default();
    let mut loaders =
        SplitLoaders::<NdArray>::open(&config.data, config.training.seed, &device).unwrap();
    let model = TransferModel::<TestBackend>::assemble(&config.model, 2, &device).unwrap();

    let first = evaluate(&model, &mut loaders.test).unwrap();
    let second = evaluate(&model, &mut loaders.test).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.total(), 20);
}

#[test]
fn test_log_probabilities_normalize() {
    let device = Default::default();
    let mut config = small_config(Path::new("unused"));
    config.model.architecture = Architecture::AlexNet;
    let mut model = TransferModel::<TestBackend>::assemble(&config.model, 2, &device).unwrap();
    model.set_mode(Mode::Eval);

    let images = Tensor::<NdArray, 4>::random(
        [3, 3, 64, 64],
        burn::tensor::Distribution::Uniform(-1.0, 1.0),
        &device,
    );
    let sums = model
        .forward(images)
        .exp()
        .sum_dim(1)
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    assert_eq!(sums.len(), 3);
    for sum in sums {
        assert!((sum - 1.0).abs() < 1e-4);
    }
}
