use anyhow::{Context, Result};
use burn::module::AutodiffModule;
use burn_ndarray::NdArrayDevice;
use omics_ae::cli::{parse_args, setup_logging, Commands, EncodeArgs, ProbeArgs, TrainArgs};
use omics_ae::data::preprocessing::align_features;
use omics_ae::data::TabularDataset;
use omics_ae::evaluation::{self, KMeans};
use omics_ae::model::checkpoint::ModelSaver;
use omics_ae::training::experiment::latent_rows;
use omics_ae::training::Experiment;
use omics_ae::utils::{format_number, RunOutputs};
use omics_ae::{DefaultBackend, TrainingBackend};
use tracing::{error, info, warn};

fn main() {
    let cli = parse_args();

    setup_logging(cli.verbose);

    info!("{}", omics_ae::info());

    let result = match cli.command {
        Commands::Train(args) => run_train(args, cli.verbose),
        Commands::Encode(args) => run_encode(args),
        Commands::Probe(args) => run_probe(args),
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_train(args: TrainArgs, verbose: u8) -> Result<()> {
    let outputs = RunOutputs::create(&args.output)?;
    info!("Output directory: {:?}", outputs.dir);

    let data_config = args.data.data_config()?;
    let model_config = args.model.model_config()?;
    let mut config = args.experiment_config(verbose)?;
    if config.loss_log.is_none() {
        config.loss_log = Some(outputs.losses());
    }
    std::fs::write(outputs.experiment_config(), serde_json::to_string_pretty(&config)?)?;

    let dataset = TabularDataset::from_config(&data_config)?;
    let device = NdArrayDevice::default();

    let mut experiment = Experiment::<TrainingBackend>::new(&dataset, model_config, config, device)
        .context("Failed to set up experiment")?;

    info!("Starting training...");
    let report = experiment.run().context("Experiment failed")?.clone();

    info!("\n=== Results ===");
    info!("Epochs: {}", experiment.losses().len());
    if let Some(loss) = experiment.losses().last() {
        info!("Final loss: {:.6}", loss);
    }
    info!("Silhouette: {:.4}", report.silhouette);
    info!("ARI: {:.4}", report.agreement.adjusted_rand_index);
    info!("NMI: {:.4}", report.agreement.normalized_mutual_info);
    info!("FMI: {:.4}", report.agreement.fowlkes_mallows);
    info!("V-measure: {:.4}", report.agreement.v_measure);

    report.save(outputs.report())?;
    if let Some(latent) = experiment.latent() {
        evaluation::write_embeddings(
            outputs.embeddings(),
            &experiment.data().sample_ids,
            latent,
            &experiment.metadata().subtypes,
            Some(&report.cluster_labels),
        )?;
    }
    ModelSaver::save(
        &experiment.model().valid(),
        outputs.checkpoint(),
        &experiment.checkpoint_metadata(),
    )?;

    info!("Report saved to: {:?}", outputs.report());
    Ok(())
}

fn run_encode(args: EncodeArgs) -> Result<()> {
    let metadata = ModelSaver::load_metadata(&args.model)
        .with_context(|| format!("Failed to read checkpoint {:?}", args.model))?;

    let dataset = TabularDataset::from_config(&args.data.data_config()?)?;
    let (matrix, feature_names) = dataset.read_expression()?;
    let subtypes = dataset.read_subtypes(&matrix.sample_ids)?;
    let matrix = align_features(&matrix, &feature_names, &metadata.feature_names)?;

    let matrix = match &metadata.preprocessing {
        Some(fitted) => fitted.transform(matrix)?,
        None => {
            warn!("Checkpoint has no fitted preprocessing, refitting on the input");
            let mut preprocessor = dataset.preprocessor.clone();
            preprocessor.max_features = None;
            preprocessor.apply(matrix, metadata.feature_names.clone())?.0
        }
    };

    let device = NdArrayDevice::default();
    let (model, _) =
        ModelSaver::load_for_dataset::<DefaultBackend, _>(&args.model, matrix.n_features(), &device)?;

    info!("Encoding {} samples", matrix.n_samples());
    let latent = latent_rows(model.encode(matrix.to_tensor::<DefaultBackend>(&device)))?;

    let clusters = match args.clusters {
        Some(k) => Some(KMeans::new(k).fit(&latent)?.labels),
        None => None,
    };

    evaluation::write_embeddings(
        &args.output,
        &matrix.sample_ids,
        &latent,
        &subtypes,
        clusters.as_deref(),
    )?;
    info!("Latent codes saved to: {:?}", args.output);
    Ok(())
}

fn run_probe(args: ProbeArgs) -> Result<()> {
    let config = args.model.model_config()?;
    let device = NdArrayDevice::default();
    let summary = config
        .summary::<DefaultBackend>(args.input_shape, &device)
        .context("Architecture does not fit the input")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    info!("Architecture: {}", summary.architecture);
    info!("Input shape: {}", summary.input_shape);
    info!("Layer widths: {:?}", summary.layer_widths);
    info!("Latent dim: {}", summary.latent_dim);
    if let (Some(length), Some(channels)) = (summary.calculated_length, summary.feature_channels) {
        info!("Calculated length: {} ({} channels)", length, channels);
    }
    info!(
        "Stages: {} encoder, {} decoder",
        summary.encoder_stages, summary.decoder_stages
    );
    info!("Parameters: {}", format_number(summary.num_params));
    Ok(())
}
