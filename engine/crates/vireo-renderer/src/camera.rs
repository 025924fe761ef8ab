use glam::{EulerRot, Mat4, Vec3};

/// 第一人称相机，右手坐标系，+Y 向上
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,

    pub euler_yaw_deg: f32,
    pub euler_pitch_deg: f32,
    pub euler_roll_deg: f32,

    pub fov_deg_vertical: f32,
    /// 宽 / 高
    pub asp: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            euler_yaw_deg: 0.0,
            euler_pitch_deg: 0.0,
            euler_roll_deg: 0.0,
            fov_deg_vertical: 60.0,
            asp: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    const CAMERA_UP: Vec3 = Vec3::Y;

    /// YXZ 表示 Y(yaw)-X(Pitch)-Z(Roll) 的旋转顺序
    const CAMERA_EULER: EulerRot = EulerRot::YXZ;

    /// 没有旋转的情况下，相机看向的是 -Z
    const CAMERA_FORWARD: Vec3 = Vec3::NEG_Z;
    const CAMERA_RIGHT: Vec3 = Vec3::X;

    const K_PITCH: f32 = 89.5;

    #[inline]
    fn rotation(&self) -> Mat4 {
        Mat4::from_euler(
            Self::CAMERA_EULER,
            self.euler_yaw_deg.to_radians(),
            self.euler_pitch_deg.to_radians(),
            self.euler_roll_deg.to_radians(),
        )
    }

    pub fn camera_forward(&self) -> Vec3 {
        self.rotation().transform_vector3(Self::CAMERA_FORWARD)
    }

    pub fn camera_right(&self) -> Vec3 {
        self.rotation().transform_vector3(Self::CAMERA_RIGHT)
    }

    pub fn get_view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.camera_forward(), Self::CAMERA_UP)
    }

    /// Vulkan 的 NDC：y 向下，深度范围 [0, 1]
    pub fn get_projection_matrix(&self) -> Mat4 {
        let mut proj = Mat4::perspective_rh(self.fov_deg_vertical.to_radians(), self.asp, self.near, self.far);
        proj.y_axis.y *= -1.0;
        proj
    }

    #[inline]
    pub fn view_projection(&self) -> Mat4 {
        self.get_projection_matrix() * self.get_view_matrix()
    }

    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.asp = width as f32 / height as f32;
        }
    }

    /// 朝相机看向的方向进行移动
    pub fn move_forward(&mut self, length: f32) {
        self.position += self.camera_forward() * length;
    }

    pub fn move_right(&mut self, length: f32) {
        self.position += self.camera_right() * length;
    }

    /// 朝世界的 Up 进行移动
    pub fn move_up(&mut self, length: f32) {
        self.position += Self::CAMERA_UP * length;
    }

    pub fn rotate_yaw(&mut self, angle: f32) {
        self.euler_yaw_deg = (self.euler_yaw_deg + angle).rem_euclid(360.0);
    }

    pub fn rotate_pitch(&mut self, angle: f32) {
        self.euler_pitch_deg = (self.euler_pitch_deg + angle).clamp(-Self::K_PITCH, Self::K_PITCH);
    }

    /// 把相机放到包围盒的 +Z 方向，看向包围盒中心，整个包围盒都在视野内
    pub fn frame_bounds(&mut self, min: Vec3, max: Vec3) {
        let center = (min + max) * 0.5;
        let radius = ((max - min).length() * 0.5).max(0.01);
        let half_fov_v = self.fov_deg_vertical.to_radians() * 0.5;
        let half_fov_h = (half_fov_v.tan() * self.asp).atan();
        let half_fov = half_fov_v.min(half_fov_h);
        let distance = radius / half_fov.sin();

        self.euler_yaw_deg = 0.0;
        self.euler_pitch_deg = 0.0;
        self.euler_roll_deg = 0.0;
        self.position = center + Vec3::Z * distance;
        self.near = (distance - radius).max(0.01) * 0.5;
        self.far = (distance + radius) * 2.0;
    }
}
