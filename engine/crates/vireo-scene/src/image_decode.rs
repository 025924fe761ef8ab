use std::path::PathBuf;

use crossbeam_utils::sync::WaitGroup;

use crate::error::SceneResult;

/// 图片数据的来源
pub enum ImageSource {
    /// glb 中 buffer view 的数据，或者已经读入内存的文件
    Bytes(Vec<u8>),
    /// 外部文件，在 worker 线程中读取
    File(PathBuf),
}

pub struct DecodeRequest {
    /// 文档中 image 的索引
    pub index: usize,
    pub source: ImageSource,
}

/// 解码之后的 RGBA8 像素
pub struct DecodedImage {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

pub enum DecodeResult {
    Success(DecodedImage),
    Failure(usize, String),
}

/// 在 rayon 线程池中解码图片
///
/// - 每个任务只持有自己的输入数据，结果通过 crossbeam channel 送回调用线程
/// - `decode_all` 会阻塞，直到这一批任务全部完成
pub struct ImageDecoder {
    pool: rayon::ThreadPool,
}

// new & init
impl ImageDecoder {
    /// `threads` 为 0 时使用 rayon 的默认线程数
    pub fn new(threads: usize) -> SceneResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("Scene-Decode-{}", index))
            .build()?;
        Ok(Self { pool })
    }
}
// tools
impl ImageDecoder {
    #[inline]
    pub fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// 解码一批图片，结果按 index 排序
    pub fn decode_all(&self, requests: Vec<DecodeRequest>) -> Vec<DecodeResult> {
        if requests.is_empty() {
            return vec![];
        }

        let (result_tx, result_rx) = crossbeam_channel::unbounded::<DecodeResult>();
        let wait_group = WaitGroup::new();

        for request in requests {
            let result_tx = result_tx.clone();
            // 任务结束时闭包销毁，wg_task 随之 drop
            let wg_task = wait_group.clone();
            self.pool.spawn(move || {
                let result = decode_image_task(request);
                let _ = result_tx.send(result);
                drop(wg_task);
            });
        }
        drop(result_tx);

        wait_group.wait();

        let mut results: Vec<DecodeResult> = result_rx.try_iter().collect();
        results.sort_by_key(|result| match result {
            DecodeResult::Success(image) => image.index,
            DecodeResult::Failure(index, _) => *index,
        });
        results
    }
}

/// 运行在 rayon 线程池中：读取 -> 解码 -> 转换为 RGBA8
fn decode_image_task(request: DecodeRequest) -> DecodeResult {
    let DecodeRequest { index, source } = request;

    let bytes = match source {
        ImageSource::Bytes(bytes) => bytes,
        ImageSource::File(path) => match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => return DecodeResult::Failure(index, format!("failed to read {:?}: {}", path, e)),
        },
    };

    match image::load_from_memory(&bytes) {
        Ok(img) => {
            let img = img.into_rgba8();
            let (width, height) = img.dimensions();
            log::debug!("decoded image {}: {}x{}", index, width, height);
            DecodeResult::Success(DecodedImage {
                index,
                width,
                height,
                pixels: img.into_raw(),
            })
        }
        Err(e) => DecodeResult::Failure(index, e.to_string()),
    }
}
